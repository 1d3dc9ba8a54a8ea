//! Multi-user chat bot that answers with the user's own lark-mcp tools.
//!
//! Each user logs in once through OAuth. Their conversation history and MCP
//! session are kept in memory until the process exits.

pub mod callback;
pub mod context;
pub mod controller;
pub mod markdown;
pub mod service;
pub mod throttle;

pub use callback::{CallbackState, CALLBACK_PATH};
pub use context::{AuthToken, ContextStore, McpConnector, UserContext};
pub use controller::{ChatController, OAUTH_SCOPES};
pub use service::AgentService;
