//! Long-connection event delivery over WebSocket.

pub mod client;
pub mod frame;

pub use client::{ClientConfig, WsClient};
pub use frame::{Frame, Header};
