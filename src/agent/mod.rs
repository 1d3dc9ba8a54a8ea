//! Tool-calling agents built on the LLM broker and MCP tools.

pub mod application;
pub mod chat;
pub mod prompt;
pub mod remote;

#[cfg(test)]
pub(crate) mod testing;

pub use application::{LoggingObserver, ToolCallingApplication};
pub use remote::connect_remote;
