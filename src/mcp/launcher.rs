//! Command line for the `@larksuiteoapi/lark-mcp` server.

use crate::config::AppCredentials;
use crate::error::Result;
use crate::mcp::client::McpClient;
use crate::mcp::transports::{StdioConfig, StdioTransport};

pub const LARK_MCP_PACKAGE: &str = "@larksuiteoapi/lark-mcp";

/// Builds and spawns a local lark-mcp server.
#[derive(Debug, Clone)]
pub struct LarkMcpLauncher {
    credentials: AppCredentials,
    user_access_token: Option<String>,
    tools: Vec<String>,
    windows: bool,
}

impl LarkMcpLauncher {
    pub fn new(credentials: AppCredentials) -> Self {
        Self {
            credentials,
            user_access_token: None,
            tools: Vec::new(),
            windows: cfg!(windows),
        }
    }

    /// Act on behalf of a user instead of the app tenant.
    pub fn with_user_access_token(mut self, token: impl Into<String>) -> Self {
        self.user_access_token = Some(token.into());
        self
    }

    /// Restrict the server to the given tools or presets (`-t`).
    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    #[cfg(test)]
    fn for_windows(mut self, windows: bool) -> Self {
        self.windows = windows;
        self
    }

    pub fn stdio_config(&self) -> StdioConfig {
        let mut args: Vec<String> = vec![
            "-y".into(),
            LARK_MCP_PACKAGE.into(),
            "mcp".into(),
            "-a".into(),
            self.credentials.app_id.clone(),
            "-s".into(),
            self.credentials.app_secret.clone(),
            "-d".into(),
            self.credentials.domain.clone(),
        ];

        if !self.tools.is_empty() {
            args.push("-t".into());
            args.push(self.tools.join(","));
        }

        match &self.user_access_token {
            Some(token) => {
                args.push("-u".into());
                args.push(token.clone());
                args.push("--token-mode".into());
                args.push("user_access_token".into());
            }
            None => {
                args.push("--token-mode".into());
                args.push("tenant_access_token".into());
            }
        }

        if self.windows {
            let mut wrapped = vec!["/c".to_string(), "npx".to_string()];
            wrapped.extend(args);
            StdioConfig::new("cmd.exe", wrapped)
        } else {
            StdioConfig::new("npx", args)
        }
    }

    /// Spawn the server and complete the MCP handshake.
    pub async fn spawn(&self) -> Result<McpClient> {
        let transport = StdioTransport::new(self.stdio_config());
        McpClient::connect(Box::new(transport)).await
    }
}
