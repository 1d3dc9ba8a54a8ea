//! Adapter between internal LLM messages and the OpenAI chat wire format.

use crate::error::{LarkBotError, Result};
use crate::llm::models::{LlmMessage, LlmToolCall, MessageRole};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Adapt LLM messages to OpenAI format.
pub fn adapt_messages_to_openai(messages: &[LlmMessage]) -> Result<Vec<Value>> {
    let mut result = Vec::with_capacity(messages.len());

    for msg in messages {
        let openai_msg = match msg.role {
            MessageRole::System => json!({
                "role": "system",
                "content": msg.content.as_deref().unwrap_or("")
            }),
            MessageRole::User => json!({
                "role": "user",
                "content": msg.content.as_deref().unwrap_or("")
            }),
            MessageRole::Assistant => {
                let mut assistant_msg = json!({
                    "role": "assistant",
                    "content": msg.content.as_deref().map(Value::from).unwrap_or(Value::Null)
                });

                if let Some(ref tool_calls) = msg.tool_calls {
                    let mut formatted_calls = Vec::with_capacity(tool_calls.len());
                    for tc in tool_calls {
                        formatted_calls.push(json!({
                            "id": tc.id.as_deref().unwrap_or(""),
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": serde_json::to_string(&tc.arguments)?
                            }
                        }));
                    }
                    assistant_msg["tool_calls"] = Value::Array(formatted_calls);
                }

                assistant_msg
            }
            MessageRole::Tool => json!({
                "role": "tool",
                "content": msg.content.as_deref().unwrap_or(""),
                "tool_call_id": msg.tool_call_id.as_deref().unwrap_or("")
            }),
        };

        result.push(openai_msg);
    }

    Ok(result)
}

/// Convert tool calls from OpenAI format to internal format.
///
/// Arguments arrive as a JSON-encoded string. A call whose arguments do not
/// decode to an object is an error.
pub fn convert_tool_calls(tool_calls: &[Value]) -> Result<Vec<LlmToolCall>> {
    let mut calls = Vec::with_capacity(tool_calls.len());

    for tc in tool_calls {
        let Some(name) = tc["function"]["name"].as_str() else {
            continue;
        };
        let id = tc["id"].as_str().map(String::from);

        let arguments = match &tc["function"]["arguments"] {
            Value::String(s) if s.trim().is_empty() => HashMap::new(),
            Value::String(s) => serde_json::from_str::<HashMap<String, Value>>(s).map_err(|e| {
                LarkBotError::GatewayError(format!(
                    "Failed to parse tool call arguments for {}: {}",
                    name, e
                ))
            })?,
            Value::Object(map) => map.clone().into_iter().collect(),
            Value::Null => HashMap::new(),
            other => {
                return Err(LarkBotError::GatewayError(format!(
                    "Unexpected tool call arguments for {}: {}",
                    name, other
                )))
            }
        };

        calls.push(LlmToolCall {
            id,
            name: name.to_string(),
            arguments,
        });
    }

    Ok(calls)
}
