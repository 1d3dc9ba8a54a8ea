use crate::error::{LarkBotError, Result};
use crate::mcp::client::McpTransport;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

pub const SESSION_HEADER: &str = "mcp-session-id";
const SESSION_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// MCP over HTTP: one POST per outbound message, replies as JSON or SSE.
pub struct StreamableHttpTransport {
    url: String,
    headers: HeaderMap,
    client: Client,
    connected: AtomicBool,
    session_id: Mutex<Option<String>>,
    inbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl StreamableHttpTransport {
    pub fn new(url: impl Into<String>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            url: url.into(),
            headers: HeaderMap::new(),
            client: Client::new(),
            connected: AtomicBool::new(false),
            session_id: Mutex::new(None),
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
        }
    }

    /// Add a header sent with every request.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| LarkBotError::ConfigError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| LarkBotError::ConfigError(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    fn queue_json(tx: &mpsc::UnboundedSender<String>, body: &str) {
        // A batch reply is queued one message at a time.
        match serde_json::from_str::<Value>(body) {
            Ok(Value::Array(items)) => {
                for item in items {
                    let _ = tx.send(item.to_string());
                }
            }
            _ => {
                let _ = tx.send(body.to_string());
            }
        }
    }
}

#[async_trait]
impl McpTransport for StreamableHttpTransport {
    async fn connect(&mut self) -> Result<()> {
        info!("Using MCP streamable HTTP endpoint: {}", self.url);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(session_id) = self.session_id.lock().await.take() {
            let response = self
                .client
                .delete(&self.url)
                .headers(self.headers.clone())
                .header(SESSION_HEADER, session_id)
                .timeout(SESSION_CLOSE_TIMEOUT)
                .send()
                .await;
            if let Err(e) = response {
                warn!("Failed to terminate MCP session: {}", e);
            }
        }

        info!("MCP streamable HTTP transport closed");
        Ok(())
    }

    async fn send(&self, message: String) -> Result<()> {
        if !self.is_connected() {
            return Err(LarkBotError::Disconnected);
        }

        let mut request = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .header(CONTENT_TYPE, "application/json")
            .body(message);
        if let Some(session_id) = self.session_id.lock().await.as_ref() {
            request = request.header(SESSION_HEADER, session_id.as_str());
        }

        let response = request.send().await?;
        let status = response.status();

        if let Some(session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut current = self.session_id.lock().await;
            if current.as_deref() != Some(session_id) {
                debug!(session_id, "MCP session established");
                *current = Some(session_id.to_string());
            }
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LarkBotError::TransportError(format!(
                "POST {} failed: {} - {}",
                self.url, status, body
            )));
        }

        if status == StatusCode::ACCEPTED {
            return Ok(());
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);

        if is_event_stream {
            let tx = self.inbound_tx.clone();
            tokio::spawn(async move {
                let mut events = response.bytes_stream().eventsource();
                while let Some(event) = events.next().await {
                    match event {
                        Ok(event) if event.event == "message" || event.event.is_empty() => {
                            if !event.data.is_empty() {
                                Self::queue_json(&tx, &event.data);
                            }
                        }
                        Ok(event) => debug!(event = %event.event, "Ignoring SSE event"),
                        Err(e) => {
                            warn!("MCP SSE stream error: {}", e);
                            break;
                        }
                    }
                }
            });
        } else {
            let body = response.text().await?;
            if !body.trim().is_empty() {
                Self::queue_json(&self.inbound_tx, &body);
            }
        }

        Ok(())
    }

    async fn receive(&self) -> Result<Option<String>> {
        if !self.is_connected() {
            return Err(LarkBotError::Disconnected);
        }

        let mut rx = self.inbound_rx.lock().await;
        match tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
            Ok(Some(message)) => {
                debug!("Received: {}", message);
                Ok(Some(message))
            }
            Ok(None) => Err(LarkBotError::Disconnected),
            Err(_) => Ok(None),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
