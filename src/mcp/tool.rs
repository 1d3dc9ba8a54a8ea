use crate::error::{LarkBotError, Result};
use crate::llm::tools::{LlmTool, ToolDescriptor};
use crate::mcp::client::McpClient;
use crate::mcp::protocol::{CallToolResult, McpToolInfo};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub const NO_TEXT_CONTENT: &str = "Tool call completed but returned no text content.";
pub const NO_CONTENT: &str = "Tool call completed but returned no specific content.";

/// Exposes one MCP server tool to the agent loop.
pub struct McpToolAdapter {
    client: Arc<McpClient>,
    info: McpToolInfo,
}

impl McpToolAdapter {
    pub fn new(client: Arc<McpClient>, info: McpToolInfo) -> Self {
        Self { client, info }
    }
}

/// Wrap every tool the server lists.
pub async fn tools_for(client: Arc<McpClient>) -> Result<Vec<Box<dyn LlmTool>>> {
    let tools = client.list_tools().await?;
    debug!(count = tools.len(), "Loaded MCP tools");
    Ok(tools
        .into_iter()
        .map(|info| Box::new(McpToolAdapter::new(client.clone(), info)) as Box<dyn LlmTool>)
        .collect())
}

/// Flatten a tool result to the text handed back to the model.
pub fn result_text(result: &CallToolResult) -> String {
    let texts = result.texts();
    if !texts.is_empty() {
        texts.join("\n")
    } else if !result.content.is_empty() {
        NO_TEXT_CONTENT.to_string()
    } else {
        NO_CONTENT.to_string()
    }
}

#[async_trait]
impl LlmTool for McpToolAdapter {
    async fn run(&self, args: &HashMap<String, Value>) -> Result<Value> {
        let arguments = Value::Object(args.clone().into_iter().collect());
        let result = self.client.call_tool(&self.info.name, arguments).await?;
        let text = result_text(&result);

        if result.is_error {
            return Err(LarkBotError::ToolError(text));
        }
        Ok(Value::String(text))
    }

    fn descriptor(&self) -> ToolDescriptor {
        let parameters = self
            .info
            .input_schema
            .clone()
            .unwrap_or_else(|| json!({"type": "object", "properties": {}}));
        ToolDescriptor::function(self.info.name.clone(), self.info.description.clone(), parameters)
    }

    fn name(&self) -> String {
        self.info.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::client::tests::{sample_tools, MockTransport};

    async fn client() -> Arc<McpClient> {
        Arc::new(McpClient::connect(Box::new(MockTransport::new(sample_tools()))).await.unwrap())
    }

    fn adapter(client: Arc<McpClient>, name: &str) -> McpToolAdapter {
        McpToolAdapter::new(
            client,
            McpToolInfo {
                name: name.to_string(),
                description: String::new(),
                input_schema: None,
            },
        )
    }

    #[tokio::test]
    async fn test_tools_for_wraps_each_tool() {
        let tools = tools_for(client().await).await.unwrap();

        assert_eq!(tools.len(), 2);
        let descriptor = tools[0].descriptor();
        assert_eq!(descriptor.function.name, "fetch-doc");
        assert_eq!(descriptor.function.parameters["properties"]["docID"]["type"], "string");
        assert_eq!(tools[1].descriptor().function.parameters, json!({"type": "object", "properties": {}}));
        assert!(tools[1].matches("get-comments"));
    }

    #[tokio::test]
    async fn test_run_joins_text_items() {
        let tool = adapter(client().await, "fetch-doc");
        let mut args = HashMap::new();
        args.insert("docID".to_string(), json!("abc"));

        let result = tool.run(&args).await.unwrap();

        assert_eq!(result, json!("called fetch-doc\n{\"docID\":\"abc\"}"));
    }

    #[tokio::test]
    async fn test_run_without_text_content() {
        let tool = adapter(client().await, "image");
        assert_eq!(tool.run(&HashMap::new()).await.unwrap(), json!(NO_TEXT_CONTENT));
    }

    #[tokio::test]
    async fn test_run_without_content() {
        let tool = adapter(client().await, "empty");
        assert_eq!(tool.run(&HashMap::new()).await.unwrap(), json!(NO_CONTENT));
    }

    #[tokio::test]
    async fn test_run_error_result_is_tool_error() {
        let tool = adapter(client().await, "denied");
        let err = tool.run(&HashMap::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Tool error: permission denied");
    }
}
