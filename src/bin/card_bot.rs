//! Alarm card bot
//!
//! Sends an alarm card when asked (menu, message or card button) and turns
//! it into a "resolved" card when the alarm is handled.
//!
//! Card template ids come from WELCOME_CARD_ID, ALARM_CARD_ID and
//! RESOLVED_CARD_ID.

use larkbot::bots::CardInteractionBot;
use larkbot::config::{load_dotenv, AppCredentials, CardTemplates};
use larkbot::lark::{EventDispatcher, LarkClient, WsClient};
use std::sync::Arc;
use tracing::{info, warn};
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
    let templates = CardTemplates::from_env();
    info!(?templates, "Card templates");

    let client = Arc::new(LarkClient::new(credentials.clone()));
    let bot = CardInteractionBot::new(client, templates);
    let dispatcher = Arc::new(EventDispatcher::new(Arc::new(bot)));

    WsClient::new(credentials, dispatcher).start().await?;
    Ok(())
}
