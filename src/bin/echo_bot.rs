//! Echo bot
//!
//! Repeats every text message back to the chat it came from. Events arrive
//! over the long connection, so no public URL is needed.
//!
//! Requires APP_ID and APP_SECRET (and optionally LARK_DOMAIN).

use larkbot::bots::EchoBot;
use larkbot::config::{load_dotenv, AppCredentials};
use larkbot::lark::{EventDispatcher, LarkClient, WsClient};
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

    let credentials = AppCredentials::from_env()?;
    let client = Arc::new(LarkClient::new(credentials.clone()));
    let dispatcher = Arc::new(EventDispatcher::new(Arc::new(EchoBot::new(client))));

    WsClient::new(credentials, dispatcher).start().await?;
    Ok(())
}
