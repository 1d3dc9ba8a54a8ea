use crate::error::{LarkBotError, Result};
use crate::mcp::client::McpTransport;
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Command line of a local MCP server.
#[derive(Debug, Clone, Default)]
pub struct StdioConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl StdioConfig {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: HashMap::new(),
        }
    }
}

/// Talks newline-delimited JSON-RPC with a child process.
pub struct StdioTransport {
    config: StdioConfig,
    child: Option<Child>,
    stdin: Option<Arc<Mutex<ChildStdin>>>,
    lines: Option<Mutex<mpsc::Receiver<String>>>,
}

impl StdioTransport {
    pub fn new(config: StdioConfig) -> Self {
        Self {
            config,
            child: None,
            stdin: None,
            lines: None,
        }
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn connect(&mut self) -> Result<()> {
        info!(
            "Starting MCP server process: {} {:?}",
            self.config.command, self.config.args
        );

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            error!("Failed to spawn MCP server process: {}", e);
            LarkBotError::TransportError(format!("Failed to spawn {}: {}", self.config.command, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| LarkBotError::TransportError("Failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LarkBotError::TransportError("Failed to capture stdout".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[MCP server stderr] {}", line);
                }
            });
        }

        let (tx, rx) = mpsc::channel(100);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if tx.send(line.to_string()).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        warn!("MCP server stdout closed (EOF)");
                        break;
                    }
                    Err(e) => {
                        warn!("Failed to read MCP server stdout: {}", e);
                        break;
                    }
                }
            }
        });

        self.child = Some(child);
        self.stdin = Some(Arc::new(Mutex::new(stdin)));
        self.lines = Some(Mutex::new(rx));

        info!("MCP server process started");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        info!("Disconnecting MCP server process");

        // Closing stdin signals EOF to the server.
        self.stdin = None;
        self.lines = None;

        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => info!("MCP server process exited: {}", status),
                _ => {
                    warn!("MCP server process did not exit gracefully, killing");
                    child.kill().await?;
                }
            }
        }

        Ok(())
    }

    async fn send(&self, message: String) -> Result<()> {
        let stdin = self.stdin.as_ref().ok_or(LarkBotError::Disconnected)?;
        let mut stdin = stdin.lock().await;

        stdin
            .write_all(format!("{}\n", message).as_bytes())
            .await
            .map_err(|e| LarkBotError::TransportError(format!("Failed to write: {}", e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| LarkBotError::TransportError(format!("Failed to flush: {}", e)))?;

        debug!("Sent: {}", message);
        Ok(())
    }

    async fn receive(&self) -> Result<Option<String>> {
        let lines = self.lines.as_ref().ok_or(LarkBotError::Disconnected)?;
        let mut lines = lines.lock().await;

        match tokio::time::timeout(Duration::from_millis(100), lines.recv()).await {
            Ok(Some(line)) => {
                debug!("Received: {}", line);
                Ok(Some(line))
            }
            Ok(None) => Err(LarkBotError::Disconnected),
            Err(_) => Ok(None),
        }
    }

    fn is_connected(&self) -> bool {
        self.child.is_some()
    }
}
