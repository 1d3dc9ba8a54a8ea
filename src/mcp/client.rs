use crate::error::{LarkBotError, Result};
use crate::mcp::protocol::*;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Transport trait for MCP communication
#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn connect(&mut self) -> Result<()>;
    async fn disconnect(&mut self) -> Result<()>;
    async fn send(&self, message: String) -> Result<()>;
    /// Next inbound message. `Ok(None)` means nothing is ready yet; a closed
    /// transport reports [`LarkBotError::Disconnected`].
    async fn receive(&self) -> Result<Option<String>>;
    fn is_connected(&self) -> bool;
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// MCP client session over any [`McpTransport`].
///
/// A background task reads the transport and routes each response to the
/// request waiting on its id.
pub struct McpClient {
    transport: Arc<RwLock<Box<dyn McpTransport>>>,
    next_id: AtomicU64,
    pending: PendingMap,
    reader: Mutex<Option<JoinHandle<()>>>,
    timeout: Duration,
    server_info: Option<InitializeResult>,
}

impl McpClient {
    /// Connect the transport and run the `initialize` handshake.
    pub async fn connect(transport: Box<dyn McpTransport>) -> Result<Self> {
        Self::connect_with_timeout(transport, DEFAULT_REQUEST_TIMEOUT).await
    }

    pub async fn connect_with_timeout(
        mut transport: Box<dyn McpTransport>,
        timeout: Duration,
    ) -> Result<Self> {
        transport.connect().await?;

        let mut client = Self {
            transport: Arc::new(RwLock::new(transport)),
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            reader: Mutex::new(None),
            timeout,
            server_info: None,
        };
        client.start_reader().await;

        match client.initialize().await {
            Ok(result) => {
                info!(
                    server = %result.server_info.name,
                    version = %result.server_info.version,
                    "MCP session initialized"
                );
                client.server_info = Some(result);
                Ok(client)
            }
            Err(e) => {
                if let Err(close_err) = client.close().await {
                    warn!("Failed to close MCP transport after handshake error: {}", close_err);
                }
                Err(e)
            }
        }
    }

    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.server_info.as_ref()
    }

    async fn start_reader(&self) {
        let transport = self.transport.clone();
        let pending = self.pending.clone();

        let handle = tokio::spawn(async move {
            loop {
                let received = {
                    let transport = transport.read().await;
                    if !transport.is_connected() {
                        break;
                    }
                    transport.receive().await
                };

                match received {
                    Ok(Some(message)) => {
                        let reply = Self::handle_message(&message, &pending).await;
                        if let Some(reply) = reply {
                            if let Err(e) = transport.read().await.send(reply).await {
                                warn!("Failed to answer server request: {}", e);
                            }
                        }
                    }
                    Ok(None) => tokio::time::sleep(Duration::from_millis(10)).await,
                    Err(LarkBotError::Disconnected) => {
                        info!("MCP transport closed");
                        break;
                    }
                    Err(e) => {
                        error!("MCP transport error: {}", e);
                        break;
                    }
                }
            }
            // Dropping the senders wakes every waiter with Disconnected.
            pending.lock().await.clear();
        });

        *self.reader.lock().await = Some(handle);
    }

    /// Route one inbound message. Returns a reply for server-initiated requests.
    async fn handle_message(message: &str, pending: &PendingMap) -> Option<String> {
        let value: Value = match serde_json::from_str(message) {
            Ok(v) => v,
            Err(e) => {
                warn!("Ignoring malformed MCP message: {}", e);
                return None;
            }
        };

        let has_method = value.get("method").is_some();
        let id = value.get("id").cloned().filter(|id| !id.is_null());

        match (id, has_method) {
            (Some(_), false) => {
                match serde_json::from_value::<JsonRpcResponse>(value) {
                    Ok(response) => match pending.lock().await.remove(&response.id) {
                        Some(waiter) => {
                            let _ = waiter.send(response);
                        }
                        None => debug!(id = response.id, "Response for unknown request"),
                    },
                    Err(e) => warn!("Invalid JSON-RPC response: {}", e),
                }
                None
            }
            (Some(id), true) => {
                // Server-initiated request. Only ping is supported.
                let method = value["method"].as_str().unwrap_or_default();
                let reply = if method == "ping" {
                    serde_json::json!({"jsonrpc": "2.0", "id": id, "result": {}})
                } else {
                    debug!(method, "Unsupported server request");
                    serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32601, "message": "Method not found"}
                    })
                };
                Some(reply.to_string())
            }
            (None, true) => {
                debug!(method = %value["method"], "MCP notification");
                None
            }
            (None, false) => {
                warn!("Unknown MCP message: {}", message);
                None
            }
        }
    }

    async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        debug!(id, method, "Sending MCP request");
        let exchange = async {
            self.transport.read().await.send(request).await?;
            rx.await.map_err(|_| LarkBotError::Disconnected)
        };

        // the timeout covers the send too; an HTTP server may hold the POST open
        let response = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                self.pending.lock().await.remove(&id);
                return Err(e);
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(LarkBotError::TimeoutError(format!(
                    "{} request {} timed out after {:?}",
                    method, id, self.timeout
                )));
            }
        };

        if let Some(error) = response.error {
            return Err(LarkBotError::ProtocolError(format!(
                "{}: {}",
                error.code, error.message
            )));
        }

        response
            .result
            .ok_or_else(|| LarkBotError::ProtocolError(format!("{} returned no result", method)))
    }

    async fn initialize(&self) -> Result<InitializeResult> {
        let params = serde_json::to_value(InitializeRequest::default())?;
        let result = self.send_request("initialize", Some(params)).await?;
        let result: InitializeResult = serde_json::from_value(result)?;

        let initialized = serde_json::to_string(&JsonRpcNotification::new("notifications/initialized"))?;
        tokio::time::timeout(self.timeout, async {
            self.transport.read().await.send(initialized).await
        })
        .await
        .map_err(|_| {
            LarkBotError::TimeoutError(format!("initialized notification timed out after {:?}", self.timeout))
        })??;

        Ok(result)
    }

    pub async fn list_tools(&self) -> Result<Vec<McpToolInfo>> {
        let result = self.send_request("tools/list", None).await?;
        let result: ListToolsResult = serde_json::from_value(result)?;
        Ok(result.tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        let params = serde_json::to_value(CallToolRequest {
            name: name.to_string(),
            arguments,
        })?;
        let result = self.send_request("tools/call", Some(params)).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Stop the reader and disconnect the transport.
    pub async fn close(&self) -> Result<()> {
        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
        }
        self.pending.lock().await.clear();
        self.transport.write().await.disconnect().await
    }
}
