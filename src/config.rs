//! Environment-driven configuration.
//!
//! Every program in this crate is configured through environment variables,
//! optionally loaded from a `.env` file with [`load_dotenv`].

use crate::error::{LarkBotError, Result};
use tracing::warn;

pub const DEFAULT_LARK_DOMAIN: &str = "https://open.feishu.cn";
pub const DEFAULT_MCP_URL: &str = "https://mcp.feishu.cn/mcp";
pub const DEFAULT_ALLOWED_TOOLS: &str = "get-comments,fetch-doc";
pub const DEFAULT_PORT: u16 = 3000;

/// Load `.env` from the working directory or a parent. Call before
/// installing the log subscriber so `RUST_LOG` can come from the file.
/// Returns false when no file was loaded.
pub fn load_dotenv() -> bool {
    dotenv::dotenv().is_ok()
}

/// Read an environment variable, falling back to `default` when unset or empty.
pub fn env_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

/// Read a required environment variable. Empty values count as missing.
pub fn require_env(key: &str) -> Result<String> {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ => Err(LarkBotError::ConfigError(format!(
            "required environment variable {} is not set",
            key
        ))),
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Application credentials for the Lark OpenAPI.
#[derive(Debug, Clone)]
pub struct AppCredentials {
    pub app_id: String,
    pub app_secret: String,
    pub domain: String,
}

impl AppCredentials {
    pub fn new(app_id: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_secret: app_secret.into(),
            domain: DEFAULT_LARK_DOMAIN.to_string(),
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into().trim_end_matches('/').to_string();
        self
    }

    /// Reads `APP_ID`, `APP_SECRET` and `LARK_DOMAIN`.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(require_env("APP_ID")?, require_env("APP_SECRET")?)
            .with_domain(env_or("LARK_DOMAIN", DEFAULT_LARK_DOMAIN)))
    }

    /// Like [`from_env`](Self::from_env) but tolerates missing credentials,
    /// for tools that can run against a server with its own defaults.
    pub fn from_env_lenient() -> Self {
        let creds = Self::new(
            std::env::var("APP_ID").unwrap_or_default(),
            std::env::var("APP_SECRET").unwrap_or_default(),
        )
        .with_domain(env_or("LARK_DOMAIN", DEFAULT_LARK_DOMAIN));

        if creds.app_id.is_empty() || creds.app_secret.is_empty() {
            warn!("APP_ID or APP_SECRET not set, using default MCP server configuration");
        }
        creds
    }
}

/// Card template ids configured in the card builder.
#[derive(Debug, Clone, Default)]
pub struct CardTemplates {
    pub welcome: String,
    pub alarm: String,
    pub resolved: String,
    pub approving: String,
    pub approved: String,
}

impl CardTemplates {
    pub fn from_env() -> Self {
        Self {
            welcome: std::env::var("WELCOME_CARD_ID").unwrap_or_default(),
            alarm: std::env::var("ALARM_CARD_ID").unwrap_or_default(),
            resolved: std::env::var("RESOLVED_CARD_ID").unwrap_or_default(),
            approving: std::env::var("APPROVING_CARD_ID").unwrap_or_default(),
            approved: std::env::var("APPROVED_CARD_ID").unwrap_or_default(),
        }
    }
}

/// Settings for the OpenAI-compatible chat-completion endpoint.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
}

impl LlmSettings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_key: require_env("OPENAI_API_KEY")?,
            model: require_env("OPENAI_MODEL")?,
            base_url: optional_env("OPENAI_BASE_URL"),
        })
    }
}

/// Settings for the hosted MCP server.
#[derive(Debug, Clone)]
pub struct RemoteMcpSettings {
    pub url: String,
    pub allowed_tools: String,
}

impl RemoteMcpSettings {
    pub fn from_env() -> Self {
        Self {
            url: env_or("MCP_URL", DEFAULT_MCP_URL),
            allowed_tools: env_or("LARK_MCP_ALLOWED_TOOLS", DEFAULT_ALLOWED_TOOLS),
        }
    }
}

/// HTTP server settings for webhook events and the OAuth callback.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub port: u16,
    pub verification_token: Option<String>,
}

impl ServerSettings {
    pub fn from_env() -> Result<Self> {
        let port = match optional_env("PORT") {
            Some(p) => p
                .parse()
                .map_err(|_| LarkBotError::ConfigError(format!("invalid PORT: {}", p)))?,
            None => DEFAULT_PORT,
        };
        Ok(Self {
            port,
            verification_token: optional_env("VERIFICATION_TOKEN"),
        })
    }

    /// Redirect URI registered for the OAuth flow.
    pub fn callback_url(&self, path: &str) -> String {
        format!("http://localhost:{}{}", self.port, path)
    }
}
