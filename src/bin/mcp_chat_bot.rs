//! Lark chat bot backed by lark-mcp
//!
//! Users log in once through OAuth; after that every message runs the agent
//! loop with lark-mcp acting as that user. Progress is streamed into a card.
//!
//! In `websocket` mode events arrive over the long connection and the HTTP
//! server only hosts the OAuth callback. In `webhook` mode the HTTP server
//! also receives events at /webhook/event.

use clap::{Parser, ValueEnum};
use larkbot::agent::chat::{
    callback, AgentService, CallbackState, ChatController, ContextStore, CALLBACK_PATH, OAUTH_SCOPES,
};
use larkbot::config::{load_dotenv, AppCredentials, LlmSettings, ServerSettings};
use larkbot::lark::{webhook, EventDispatcher, LarkClient, WsClient};
use larkbot::llm::gateways::{OpenAIConfig, OpenAIGateway};
use larkbot::llm::LlmBroker;
use larkbot::mcp::LarkMcpLauncher;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Websocket,
    Webhook,
}

#[derive(Parser, Debug)]
#[command(about = "Lark chat bot with per-user MCP tools")]
struct Args {
    /// How events reach the bot
    #[arg(value_enum, default_value = "websocket")]
    mode: Mode,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv_loaded = load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    if !dotenv_loaded {
        warn!("No .env file found, relying on process environment");
    }
    let args = Args::parse();
    info!(mode = ?args.mode, "Run with mode");

    let credentials = AppCredentials::from_env()?;
    let settings = LlmSettings::from_env()?;
    let server = ServerSettings::from_env()?;

    let lark = Arc::new(LarkClient::new(credentials.clone()));
    let redirect_uri = server.callback_url(CALLBACK_PATH);
    let authorize_url = lark.authorize_url(&redirect_uri, OAUTH_SCOPES)?;

    let contexts = Arc::new(ContextStore::new(Arc::new(LarkMcpLauncher::new(credentials.clone()))));
    let gateway =
        OpenAIGateway::with_config(OpenAIConfig::from_settings(&settings).with_provider_key_headers())?;
    let broker = LlmBroker::new(settings.model.clone(), Arc::new(gateway));
    let agent = Arc::new(AgentService::new(lark.clone(), contexts.clone(), broker));
    let controller = ChatController::new(lark.clone(), contexts.clone(), agent, authorize_url);
    let dispatcher = Arc::new(
        EventDispatcher::new(Arc::new(controller)).with_verification_token(server.verification_token.clone()),
    );

    let mut app = callback::router(CallbackState {
        lark,
        contexts,
        redirect_uri,
    });
    match args.mode {
        Mode::Webhook => app = app.merge(webhook::router(dispatcher)),
        Mode::Websocket => {
            let ws = WsClient::new(credentials, dispatcher);
            tokio::spawn(async move {
                if let Err(e) = ws.start().await {
                    error!("Long connection stopped: {}", e);
                }
            });
        }
    }

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", server.port)).await?;
    info!("Server running at http://localhost:{}", server.port);
    axum::serve(listener, app).await?;
    Ok(())
}
