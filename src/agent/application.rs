use crate::agent::prompt::SYSTEM_PROMPT;
use crate::config::{AppCredentials, LlmSettings};
use crate::error::Result;
use crate::llm::gateways::{OpenAIConfig, OpenAIGateway};
use crate::llm::tools::LlmTool;
use crate::llm::{AgentRun, AgentStep, LlmBroker, LlmMessage, StepObserver, ToolErrorPolicy};
use crate::mcp::{tools_for, LarkMcpLauncher, McpClient};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Logs what the model said and which tools ran after each step.
pub struct LoggingObserver;

#[async_trait]
impl StepObserver for LoggingObserver {
    async fn on_step(&self, step: &AgentStep) {
        for message in &step.messages {
            for call in message.requested_tools() {
                info!(step = step.index, tool = %call.name, "Executing tool call");
            }
            if message.tool_call_id.is_some() {
                info!(step = step.index, result_len = message.text().len(), "Tool execution completed");
            }
        }
    }
}

/// Answers one query with a model that can call the tools of an MCP server.
///
/// Tools are listed once when the application is built. Tool failures stop the
/// run.
pub struct ToolCallingApplication {
    client: Arc<McpClient>,
    broker: LlmBroker,
    tools: Vec<Box<dyn LlmTool>>,
    system_prompt: String,
}

impl ToolCallingApplication {
    pub async fn new(client: Arc<McpClient>, broker: LlmBroker) -> Result<Self> {
        let tools = tools_for(client.clone()).await?;
        info!(count = tools.len(), "Loaded MCP tools");
        Ok(Self {
            client,
            broker: broker.with_tool_error_policy(ToolErrorPolicy::Abort),
            tools,
            system_prompt: SYSTEM_PROMPT.to_string(),
        })
    }

    /// Spawn a local lark-mcp server in tenant token mode and wire it to an
    /// OpenAI-compatible model.
    pub async fn launch(credentials: AppCredentials, settings: &LlmSettings) -> Result<Self> {
        let client = LarkMcpLauncher::new(credentials).spawn().await?;
        let gateway = OpenAIGateway::with_config(
            OpenAIConfig::from_settings(settings).with_provider_key_headers(),
        )?;
        let broker = LlmBroker::new(settings.model.clone(), Arc::new(gateway));
        Self::new(Arc::new(client), broker).await
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub async fn process_query(&self, query: &str) -> Result<AgentRun> {
        let conversation = vec![LlmMessage::system(&self.system_prompt), LlmMessage::user(query)];
        self.broker
            .run(conversation, Some(self.tools.as_slice()), None, Some(&LoggingObserver))
            .await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.client.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::{text, tool_calls, ScriptedGateway};
    use crate::error::LarkBotError;
    use crate::llm::MessageRole;
    use crate::mcp::client::tests::{sample_tools, MockTransport};
    use serde_json::json;

    async fn application(gateway: Arc<ScriptedGateway>) -> ToolCallingApplication {
        let client = McpClient::connect(Box::new(MockTransport::new(sample_tools()))).await.unwrap();
        ToolCallingApplication::new(Arc::new(client), LlmBroker::new("test-model", gateway))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_lists_tools_once() {
        let app = application(Arc::new(ScriptedGateway::new(vec![]))).await;
        assert_eq!(app.tool_names(), vec!["fetch-doc", "get-comments"]);
    }

    #[tokio::test]
    async fn test_tool_result_is_fed_back() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            tool_calls(&[("call_1", "fetch-doc", json!({"docID": "abc"}))]),
            text("The document says hello."),
        ]));
        let app = application(gateway.clone()).await;

        let run = app.process_query("read abc").await.unwrap();

        assert_eq!(run.content, "The document says hello.");
        assert_eq!(run.iterations, 2);

        let second = &gateway.requests()[1];
        assert_eq!(second[0].role, MessageRole::System);
        assert_eq!(second[0].content.as_deref(), Some(SYSTEM_PROMPT));
        assert_eq!(second[1].content.as_deref(), Some("read abc"));
        let tool_message = second.last().unwrap();
        assert_eq!(tool_message.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(
            tool_message.content.as_deref(),
            Some("called fetch-doc\n{\"docID\":\"abc\"}")
        );
    }

    #[tokio::test]
    async fn test_tool_failure_aborts() {
        let gateway = Arc::new(ScriptedGateway::new(vec![tool_calls(&[(
            "call_1",
            "denied",
            json!({}),
        )])]));
        let client = McpClient::connect(Box::new(MockTransport::new(json!([
            {"name": "denied", "inputSchema": {"type": "object"}}
        ]))))
        .await
        .unwrap();
        let app = ToolCallingApplication::new(Arc::new(client), LlmBroker::new("m", gateway))
            .await
            .unwrap();

        let err = app.process_query("go").await.unwrap_err();
        assert!(matches!(err, LarkBotError::ToolError(msg) if msg.contains("permission denied")));
    }
}
