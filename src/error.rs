//! Crate-wide error type.
//!
//! Lark OpenAPI failures keep the platform's `code`, `msg` and log id so they
//! can be reported to whoever runs the bot.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LarkBotError {
    #[error("LLM gateway error: {0}")]
    GatewayError(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Lark API error {code}: {msg} (request id: {request_id})")]
    LarkApi {
        code: i64,
        msg: String,
        request_id: String,
    },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    #[error("Connection closed")]
    Disconnected,
}

impl From<tokio_tungstenite::tungstenite::Error> for LarkBotError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        LarkBotError::WebSocketError(e.to_string())
    }
}

impl From<prost::DecodeError> for LarkBotError {
    fn from(e: prost::DecodeError) -> Self {
        LarkBotError::ProtocolError(format!("invalid frame: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, LarkBotError>;
