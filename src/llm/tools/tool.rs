use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Tool entry of a chat-completions request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub r#type: String,
    pub function: FunctionDescriptor,
}

/// `parameters` is a JSON Schema object, passed through as the tool server
/// published it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDescriptor {
    pub fn function(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            r#type: "function".to_string(),
            function: FunctionDescriptor {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// A tool the model may call during an agent run.
#[async_trait]
pub trait LlmTool: Send + Sync {
    /// Run with the arguments the model supplied. A string result is passed
    /// back verbatim; anything else is sent as JSON.
    async fn run(&self, args: &HashMap<String, Value>) -> Result<Value>;

    fn descriptor(&self) -> ToolDescriptor;

    fn name(&self) -> String {
        self.descriptor().function.name
    }

    fn matches(&self, name: &str) -> bool {
        self.name() == name
    }
}
