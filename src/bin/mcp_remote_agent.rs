//! Tool-calling demo against the hosted Lark MCP endpoint
//!
//! Fetches a tenant access token for the app and connects to MCP_URL over
//! streamable HTTP, exposing only LARK_MCP_ALLOWED_TOOLS.

use larkbot::agent::prompt::REMOTE_DEMO_PROMPT;
use larkbot::agent::{connect_remote, ToolCallingApplication};
use larkbot::config::{load_dotenv, AppCredentials, LlmSettings, RemoteMcpSettings};
use larkbot::lark::LarkClient;
use larkbot::llm::gateways::{OpenAIConfig, OpenAIGateway};
use larkbot::llm::LlmBroker;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv_loaded = load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    if !dotenv_loaded {
        warn!("No .env file found, relying on process environment");
    }

    let settings = LlmSettings::from_env()?;
    let lark = LarkClient::new(AppCredentials::from_env()?);
    let client = connect_remote(&lark, &RemoteMcpSettings::from_env()).await?;

    let gateway =
        OpenAIGateway::with_config(OpenAIConfig::from_settings(&settings).with_provider_key_headers())?;
    let broker = LlmBroker::new(settings.model.clone(), Arc::new(gateway));
    let app = ToolCallingApplication::new(Arc::new(client), broker).await?;

    let result = app.process_query(REMOTE_DEMO_PROMPT).await;
    if let Err(e) = app.shutdown().await {
        warn!("Failed to close MCP session: {}", e);
    }

    println!("{}", result?.content);
    Ok(())
}
