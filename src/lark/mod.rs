//! Lark/Feishu messaging platform: OpenAPI client, event payloads, the
//! two event transports (webhook and long connection) and JSSDK signing.

pub mod cards;
pub mod client;
pub mod dispatcher;
pub mod events;
pub mod jssdk;
pub mod messages;
pub mod webhook;
pub mod ws;

pub use cards::{Card, CardActionResponse, Toast, ToastType};
pub use client::{LarkClient, MessageSender, UserInfo, UserToken};
pub use dispatcher::{DispatchOutcome, EventDispatcher, EventHandler};
pub use messages::{MsgType, ReceiveIdType, TextMessageBuilder};
pub use ws::WsClient;
