//! Markdown rendering of a run for the progress card.

use crate::llm::{LlmMessage, MessageRole};
use serde_json::Value;
use std::collections::HashMap;

pub fn format_tool_call(name: &str, arguments: &HashMap<String, Value>) -> String {
    let args = serde_json::to_string_pretty(arguments).unwrap_or_else(|_| "{}".to_string());
    format!("调用 ```{}``` 工具，参数为:\n ```\n{}\n```", name, args)
}

pub fn format_tool_result(content: &str) -> String {
    format!("执行结果：\n ```\n{}\n```", content)
}

pub fn render(messages: &[LlmMessage]) -> String {
    let mut parts = Vec::new();

    for message in messages {
        match message.role {
            MessageRole::Assistant => {
                if !message.text().is_empty() {
                    parts.push(message.text().to_string());
                }
                for call in message.requested_tools() {
                    parts.push(format_tool_call(&call.name, &call.arguments));
                }
            }
            MessageRole::Tool => {
                parts.push(format_tool_result(message.text()));
            }
            _ => {}
        }
    }

    parts.join("\n\n")
}
