use crate::error::{LarkBotError, Result};
use crate::llm::gateway::{CompletionConfig, LlmGateway};
use crate::llm::models::{LlmGatewayResponse, LlmMessage, LlmToolCall};
use crate::llm::tools::LlmTool;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Default ceiling on model round-trips per run.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// What to do when a tool call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolErrorPolicy {
    /// Stop the run and return the tool's error.
    Abort,
    /// Hand the error text to the model as the tool's result.
    ReportToModel,
}

/// Messages produced by one iteration of the agent loop.
#[derive(Debug, Clone)]
pub struct AgentStep {
    pub index: usize,
    pub messages: Vec<LlmMessage>,
}

/// Receives progress while a run is in flight.
#[async_trait]
pub trait StepObserver: Send + Sync {
    async fn on_step(&self, step: &AgentStep);
}

/// Outcome of [`LlmBroker::run`].
#[derive(Debug, Clone, Default)]
pub struct AgentRun {
    /// Messages appended to the conversation by this run, in order.
    pub messages: Vec<LlmMessage>,
    /// Content of the last assistant message.
    pub content: String,
    pub iterations: usize,
    pub hit_iteration_limit: bool,
}

/// Main interface for LLM interactions
///
/// Drives the tool-calling loop: ask the model, run the tools it requests,
/// feed the results back, and stop when it answers without tool calls or the
/// iteration ceiling is reached.
pub struct LlmBroker {
    model: String,
    gateway: Arc<dyn LlmGateway>,
    max_iterations: usize,
    tool_error_policy: ToolErrorPolicy,
}

impl LlmBroker {
    /// Create a new LLM broker
    pub fn new(model: impl Into<String>, gateway: Arc<dyn LlmGateway>) -> Self {
        Self {
            model: model.into(),
            gateway,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tool_error_policy: ToolErrorPolicy::Abort,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tool_error_policy(mut self, policy: ToolErrorPolicy) -> Self {
        self.tool_error_policy = policy;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generate text response from LLM, running any requested tools.
    pub async fn generate(
        &self,
        messages: &[LlmMessage],
        tools: Option<&[Box<dyn LlmTool>]>,
        config: Option<CompletionConfig>,
    ) -> Result<String> {
        let run = self.run(messages.to_vec(), tools, config, None).await?;
        Ok(run.content)
    }

    /// Run the bounded agent loop over `conversation`.
    pub async fn run(
        &self,
        mut conversation: Vec<LlmMessage>,
        tools: Option<&[Box<dyn LlmTool>]>,
        config: Option<CompletionConfig>,
        observer: Option<&dyn StepObserver>,
    ) -> Result<AgentRun> {
        let config = config.unwrap_or_default();
        let mut run = AgentRun::default();

        for index in 0..self.max_iterations {
            info!(step = index, "LLM processing...");
            let response =
                self.gateway.complete(&self.model, &conversation, tools, &config).await?;
            run.iterations = index + 1;

            let wants_tools = response.wants_tools();
            let LlmGatewayResponse { content, tool_calls } = response;

            let text = content.clone().unwrap_or_default();
            if text.is_empty() && wants_tools {
                info!(step = index, "I need to call tools to process your request");
            } else {
                info!(step = index, response = %text, "LLM response");
            }
            run.content = text;

            let assistant = LlmMessage::assistant_tool_calls(content, tool_calls.clone());
            conversation.push(assistant.clone());
            let mut step_messages = vec![assistant];

            if !wants_tools {
                run.messages.extend(step_messages.iter().cloned());
                self.notify(observer, index, step_messages).await;
                return Ok(run);
            }

            info!("Tool calls requested: {}", tool_calls.len());
            for tool_call in &tool_calls {
                let result = self.execute_tool_call(tool_call, tools).await?;
                let message = LlmMessage::tool_result(tool_call.id.clone(), result);
                conversation.push(message.clone());
                step_messages.push(message);
            }

            run.messages.extend(step_messages.iter().cloned());
            self.notify(observer, index, step_messages).await;
        }

        warn!(
            max_iterations = self.max_iterations,
            "Agent loop reached its iteration limit"
        );
        run.hit_iteration_limit = true;
        Ok(run)
    }

    async fn execute_tool_call(
        &self,
        tool_call: &LlmToolCall,
        tools: Option<&[Box<dyn LlmTool>]>,
    ) -> Result<String> {
        let tool = tools.and_then(|tools| tools.iter().find(|t| t.matches(&tool_call.name)));

        let Some(tool) = tool else {
            warn!("Tool not found: {}", tool_call.name);
            return Ok(format!("Tool not found: {}", tool_call.name));
        };

        info!("Executing tool: {}", tool_call.name);
        match tool.run(&tool_call.arguments).await {
            Ok(output) => {
                info!("Tool {} execution completed", tool_call.name);
                Ok(match output {
                    serde_json::Value::String(s) => s,
                    other => serde_json::to_string(&other)?,
                })
            }
            Err(e) => {
                warn!("Tool {} failed: {}", tool_call.name, e);
                match self.tool_error_policy {
                    ToolErrorPolicy::Abort => Err(LarkBotError::ToolError(format!(
                        "{} failed: {}",
                        tool_call.name, e
                    ))),
                    ToolErrorPolicy::ReportToModel => Ok(format!("Error: {}", e)),
                }
            }
        }
    }

    async fn notify(
        &self,
        observer: Option<&dyn StepObserver>,
        index: usize,
        messages: Vec<LlmMessage>,
    ) {
        if let Some(observer) = observer {
            observer.on_step(&AgentStep { index, messages }).await;
        }
    }
}
