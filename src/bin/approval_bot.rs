//! Approval card bot
//!
//! Card template ids come from APPROVING_CARD_ID and APPROVED_CARD_ID.

use larkbot::bots::ApprovalBot;
use larkbot::config::{load_dotenv, AppCredentials, CardTemplates};
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
    let bot = ApprovalBot::new(client, CardTemplates::from_env());
    let dispatcher = Arc::new(EventDispatcher::new(Arc::new(bot)));

    WsClient::new(credentials, dispatcher).start().await?;
    Ok(())
}
