pub mod agent;
pub mod bots;
pub mod config;
pub mod error;
pub mod lark;
pub mod llm;
pub mod mcp;

pub use error::{LarkBotError, Result};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::config::{AppCredentials, CardTemplates, LlmSettings};
    pub use crate::error::{LarkBotError, Result};
    pub use crate::lark::{EventDispatcher, EventHandler, LarkClient, MessageSender, WsClient};
    pub use crate::llm::gateways::{OpenAIConfig, OpenAIGateway};
    pub use crate::llm::tools::{FunctionDescriptor, LlmTool, ToolDescriptor};
    pub use crate::llm::{CompletionConfig, LlmBroker, LlmGateway, LlmMessage, MessageRole};
    pub use crate::mcp::{McpClient, McpTransport};
}
