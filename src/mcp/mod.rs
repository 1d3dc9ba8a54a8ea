//! Model Context Protocol client.
//!
//! Only the client side of the handshake, tool listing and tool calls is
//! implemented, over a child process or streamable HTTP.

pub mod client;
pub mod launcher;
pub mod protocol;
pub mod tool;
pub mod transports;

pub use client::{McpClient, McpTransport};
pub use launcher::LarkMcpLauncher;
pub use protocol::{CallToolResult, ContentItem, McpToolInfo};
pub use tool::{tools_for, McpToolAdapter};
pub use transports::{StdioConfig, StdioTransport, StreamableHttpTransport};
