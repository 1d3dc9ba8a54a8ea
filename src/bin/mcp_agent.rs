//! Tool-calling demo against a local lark-mcp server
//!
//! Spawns `npx @larksuiteoapi/lark-mcp` with the app credentials, hands its
//! tools to an OpenAI-compatible model and runs one query to completion.
//!
//! Requires OPENAI_API_KEY and OPENAI_MODEL (OPENAI_BASE_URL optional), plus
//! APP_ID and APP_SECRET for the MCP server.

use clap::Parser;
use larkbot::agent::prompt::QUICK_DEMO_PROMPT;
use larkbot::agent::ToolCallingApplication;
use larkbot::config::{load_dotenv, AppCredentials, LlmSettings};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Run one query through a model with lark-mcp tools")]
struct Args {
    /// Query to send instead of the built-in demo prompt
    #[arg(short, long)]
    query: Option<String>,
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

    let settings = LlmSettings::from_env()?;
    info!(model = %settings.model, base_url = ?settings.base_url, "Using model");

    let app = ToolCallingApplication::launch(AppCredentials::from_env_lenient(), &settings).await?;
    let query = args.query.as_deref().unwrap_or(QUICK_DEMO_PROMPT);
    info!(query, "Processing query");

    let result = app.process_query(query).await;
    if let Err(e) = app.shutdown().await {
        warn!("Failed to stop MCP server: {}", e);
    }

    let run = result?;
    if run.hit_iteration_limit {
        warn!(iterations = run.iterations, "Stopped at the iteration limit");
    }
    println!("{}", run.content);
    info!("Application execution completed");
    Ok(())
}
