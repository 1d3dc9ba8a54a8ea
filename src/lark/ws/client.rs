use crate::config::AppCredentials;
use crate::error::{LarkBotError, Result};
use crate::lark::dispatcher::{DispatchOutcome, EventDispatcher};
use crate::lark::ws::frame::*;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use prost::Message as _;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use url::Url;

/// Incomplete multi-part payloads are dropped after this long.
const CHUNK_TTL: Duration = Duration::from_secs(10);

/// Connection parameters handed out by the endpoint and refreshed by pongs.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClientConfig {
    /// Consecutive failed reconnect attempts before giving up, `-1` for
    /// unlimited.
    #[serde(default = "default_reconnect_count")]
    pub reconnect_count: i64,
    /// Seconds between reconnect attempts.
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval: u64,
    /// Upper bound in seconds of the jitter before the first reconnect.
    #[serde(default)]
    pub reconnect_nonce: u64,
    /// Seconds between pings.
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
}

fn default_reconnect_count() -> i64 {
    -1
}

fn default_reconnect_interval() -> u64 {
    120
}

fn default_ping_interval() -> u64 {
    120
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_count: default_reconnect_count(),
            reconnect_interval: default_reconnect_interval(),
            reconnect_nonce: 30,
            ping_interval: default_ping_interval(),
        }
    }
}

impl ClientConfig {
    /// Whether `failures` consecutive failed attempts use up the budget.
    pub fn retries_exhausted(&self, failures: i64) -> bool {
        self.reconnect_count >= 0 && failures > self.reconnect_count
    }
}

#[derive(Debug, Deserialize)]
struct EndpointResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Option<EndpointData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EndpointData {
    #[serde(rename = "URL")]
    url: String,
    #[serde(default)]
    client_config: Option<ClientConfig>,
}

/// Where to connect, as returned by the endpoint API.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url: String,
    pub service_id: i32,
    pub device_id: String,
}

impl Endpoint {
    fn parse(url: String) -> Result<Self> {
        let parsed = Url::parse(&url)
            .map_err(|e| LarkBotError::ProtocolError(format!("invalid endpoint URL: {}", e)))?;
        let query: HashMap<String, String> = parsed.query_pairs().into_owned().collect();
        let service_id = query
            .get("service_id")
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();
        let device_id = query.get("device_id").cloned().unwrap_or_default();
        Ok(Self {
            url,
            service_id,
            device_id,
        })
    }
}

/// Collects the parts of payloads split across several frames.
#[derive(Default)]
pub struct ChunkBuffer {
    pending: HashMap<String, (Instant, Vec<Option<Vec<u8>>>)>,
}

impl ChunkBuffer {
    /// Store part `seq` of `sum`; returns the whole payload once complete.
    pub fn push(&mut self, message_id: &str, sum: usize, seq: usize, data: Vec<u8>) -> Option<Vec<u8>> {
        if sum <= 1 {
            return Some(data);
        }
        if seq >= sum {
            warn!(message_id, seq, sum, "Dropping out-of-range frame part");
            return None;
        }

        let now = Instant::now();
        self.pending.retain(|_, (created, _)| now.duration_since(*created) < CHUNK_TTL);

        let (_, parts) = self
            .pending
            .entry(message_id.to_string())
            .or_insert_with(|| (now, vec![None; sum]));
        if parts.len() != sum {
            *parts = vec![None; sum];
        }
        parts[seq] = Some(data);

        if parts.iter().all(Option::is_some) {
            let (_, parts) = self.pending.remove(message_id)?;
            return Some(parts.into_iter().flatten().flatten().collect());
        }
        None
    }
}

/// Long-connection event receiver.
pub struct WsClient {
    credentials: AppCredentials,
    dispatcher: Arc<EventDispatcher>,
    http: Client,
    config: Arc<Mutex<ClientConfig>>,
}

impl WsClient {
    pub fn new(credentials: AppCredentials, dispatcher: Arc<EventDispatcher>) -> Self {
        Self {
            credentials,
            dispatcher,
            http: Client::new(),
            config: Arc::new(Mutex::new(ClientConfig::default())),
        }
    }

    pub async fn client_config(&self) -> ClientConfig {
        *self.config.lock().await
    }

    /// Ask the platform for a connection URL.
    pub async fn fetch_endpoint(&self) -> Result<Endpoint> {
        let response: EndpointResponse = self
            .http
            .post(format!("{}/callback/ws/endpoint", self.credentials.domain))
            .header("locale", "zh")
            .json(&json!({
                "AppID": self.credentials.app_id,
                "AppSecret": self.credentials.app_secret,
            }))
            .send()
            .await?
            .json()
            .await?;

        if response.code != 0 {
            return Err(LarkBotError::LarkApi {
                code: response.code,
                msg: response.msg,
                request_id: String::new(),
            });
        }

        let data = response
            .data
            .ok_or_else(|| LarkBotError::ProtocolError("endpoint response has no data".to_string()))?;
        if let Some(config) = data.client_config {
            *self.config.lock().await = config;
        }
        Endpoint::parse(data.url)
    }

    /// Connect and serve events, reconnecting as the client config allows.
    ///
    /// `ReconnectCount` is a budget per outage: a successful connect resets
    /// it, so only consecutive failed attempts count towards giving up.
    pub async fn start(&self) -> Result<()> {
        let mut failures: i64 = 0;

        loop {
            match self.fetch_endpoint().await {
                Ok(endpoint) => match tokio_tungstenite::connect_async(endpoint.url.as_str()).await {
                    Ok((stream, _)) => {
                        failures = 0;
                        info!(
                            service_id = endpoint.service_id,
                            device_id = %endpoint.device_id,
                            "Long connection established"
                        );
                        match self.serve(stream, endpoint.service_id).await {
                            Ok(()) => info!("Long connection closed"),
                            Err(e) => warn!("Long connection lost: {}", e),
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        warn!("WebSocket connect failed: {}", e);
                    }
                },
                Err(e) => {
                    failures += 1;
                    warn!("Failed to fetch long connection endpoint: {}", e);
                }
            }

            let config = self.client_config().await;
            if config.retries_exhausted(failures) {
                error!(attempts = failures, "Giving up on the long connection");
                return Err(LarkBotError::Disconnected);
            }

            info!(seconds = config.reconnect_interval, "Reconnecting");
            tokio::time::sleep(Duration::from_secs(config.reconnect_interval)).await;
        }
    }

    async fn serve<S>(&self, stream: S, service_id: i32) -> Result<()>
    where
        S: futures::Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
            + futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
            + Send
            + Unpin
            + 'static,
    {
        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();

        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::binary(frame.encode_to_vec())).await {
                    warn!("Failed to write frame: {}", e);
                    break;
                }
            }
        });

        let mut chunks = ChunkBuffer::default();
        // First ping goes out right away.
        let ping = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(ping);

        let result = loop {
            tokio::select! {
                biased;
                _ = &mut ping => {
                    debug!("Sending ping");
                    if out_tx.send(Frame::ping(service_id)).is_err() {
                        break Err(LarkBotError::Disconnected);
                    }
                    let interval = self.client_config().await.ping_interval.max(1);
                    ping.as_mut().reset(tokio::time::Instant::now() + Duration::from_secs(interval));
                }
                message = source.next() => match message {
                    Some(Ok(Message::Binary(data))) => match Frame::decode(&data[..]) {
                        Ok(frame) => self.handle_frame(frame, &mut chunks, &out_tx).await,
                        Err(e) => warn!("Dropping undecodable frame: {}", e),
                    },
                    Some(Ok(Message::Close(reason))) => {
                        info!(?reason, "Server closed the long connection");
                        break Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(e.into()),
                    None => break Ok(()),
                },
            }
        };

        writer.abort();
        result
    }

    async fn handle_frame(
        &self,
        frame: Frame,
        chunks: &mut ChunkBuffer,
        out_tx: &mpsc::UnboundedSender<Frame>,
    ) {
        if frame.is_control() {
            if frame.frame_type() == Some(TYPE_PONG) && !frame.payload_bytes().is_empty() {
                match serde_json::from_slice::<ClientConfig>(frame.payload_bytes()) {
                    Ok(config) => {
                        debug!(?config, "Client config updated by pong");
                        *self.config.lock().await = config;
                    }
                    Err(e) => debug!("Ignoring pong payload: {}", e),
                }
            }
            return;
        }

        let frame_type = frame.frame_type().unwrap_or_default().to_string();
        if frame_type != TYPE_EVENT && frame_type != TYPE_CARD {
            debug!(frame_type = %frame_type, "Ignoring data frame");
            return;
        }

        let message_id = frame.header(HEADER_MESSAGE_ID).unwrap_or_default().to_string();
        let sum = frame.header(HEADER_SUM).and_then(|s| s.parse().ok()).unwrap_or(1);
        let seq = frame.header(HEADER_SEQ).and_then(|s| s.parse().ok()).unwrap_or(0);
        let Some(payload) = chunks.push(&message_id, sum, seq, frame.payload_bytes().to_vec())
        else {
            return;
        };

        debug!(
            message_id = %message_id,
            trace_id = frame.header(HEADER_TRACE_ID).unwrap_or_default(),
            frame_type = %frame_type,
            "Dispatching frame payload"
        );

        let dispatcher = self.dispatcher.clone();
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let response = response_payload(dispatcher.dispatch(&payload).await);

            let mut reply = frame;
            reply.set_header(HEADER_BIZ_RT, started.elapsed().as_millis().to_string());
            reply.payload = Some(response.to_string().into_bytes());
            if out_tx.send(reply).is_err() {
                warn!(message_id = %message_id, "Connection gone before the response was sent");
            }
        });
    }
}

/// Body of the frame acknowledging a dispatched payload.
fn response_payload(outcome: Result<DispatchOutcome>) -> Value {
    match outcome {
        Ok(DispatchOutcome::Handled(Some(body))) => json!({
            "code": 200,
            "headers": {},
            "data": BASE64.encode(body.to_string()),
        }),
        Ok(DispatchOutcome::Challenge(challenge)) => json!({
            "code": 200,
            "headers": {},
            "data": BASE64.encode(json!({ "challenge": challenge }).to_string()),
        }),
        Ok(_) => json!({"code": 200, "headers": {}}),
        Err(e) => {
            error!("Event handler failed: {}", e);
            json!({"code": 500, "headers": {}})
        }
    }
}
