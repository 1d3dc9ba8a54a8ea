use crate::error::{LarkBotError, Result};
use crate::llm::tools::LlmTool;
use crate::llm::{CompletionConfig, LlmGateway, LlmGatewayResponse, LlmMessage, LlmToolCall};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;

/// Gateway that replays canned responses and records every request.
pub(crate) struct ScriptedGateway {
    responses: Vec<LlmGatewayResponse>,
    failure: Option<String>,
    requests: Mutex<Vec<Vec<LlmMessage>>>,
}

impl ScriptedGateway {
    pub(crate) fn new(responses: Vec<LlmGatewayResponse>) -> Self {
        Self {
            responses,
            failure: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self {
            responses: Vec::new(),
            failure: Some(message.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<Vec<LlmMessage>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmGateway for ScriptedGateway {
    async fn complete(
        &self,
        _model: &str,
        messages: &[LlmMessage],
        _tools: Option<&[Box<dyn LlmTool>]>,
        _config: &CompletionConfig,
    ) -> Result<LlmGatewayResponse> {
        let mut requests = self.requests.lock().unwrap();
        let index = requests.len();
        requests.push(messages.to_vec());

        if let Some(message) = &self.failure {
            return Err(LarkBotError::GatewayError(message.clone()));
        }
        Ok(self.responses.get(index).cloned().unwrap_or_else(|| text("default response")))
    }
}

pub(crate) fn text(content: &str) -> LlmGatewayResponse {
    LlmGatewayResponse {
        content: Some(content.to_string()),
        tool_calls: vec![],
    }
}

pub(crate) fn tool_calls(calls: &[(&str, &str, Value)]) -> LlmGatewayResponse {
    LlmGatewayResponse {
        content: None,
        tool_calls: calls
            .iter()
            .map(|(id, name, args)| LlmToolCall {
                id: Some(id.to_string()),
                name: name.to_string(),
                arguments: args
                    .as_object()
                    .map(|m| m.clone().into_iter().collect())
                    .unwrap_or_default(),
            })
            .collect(),
    }
}
