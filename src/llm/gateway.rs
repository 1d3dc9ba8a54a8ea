use crate::error::Result;
use crate::llm::models::{LlmGatewayResponse, LlmMessage};
use crate::llm::tools::LlmTool;
use async_trait::async_trait;

/// Sampling overrides for one completion. `None` leaves the field out of the
/// request.
#[derive(Debug, Clone, Default)]
pub struct CompletionConfig {
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
}

/// A chat-completion backend.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        messages: &[LlmMessage],
        tools: Option<&[Box<dyn LlmTool>]>,
        config: &CompletionConfig,
    ) -> Result<LlmGatewayResponse>;
}
