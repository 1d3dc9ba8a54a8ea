//! JSSDK signature server
//!
//! Serves `GET /get_signature?url=<page url>` for web apps opened inside
//! Lark that need to call `h5sdk.config`.

use larkbot::config::{load_dotenv, AppCredentials, ServerSettings};
use larkbot::lark::{jssdk, LarkClient};
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

    let server = ServerSettings::from_env()?;
    let client = Arc::new(LarkClient::new(AppCredentials::from_env()?));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", server.port)).await?;
    info!("Server running at http://localhost:{}{}", server.port, jssdk::SIGNATURE_PATH);
    axum::serve(listener, jssdk::router(client)).await?;
    Ok(())
}
