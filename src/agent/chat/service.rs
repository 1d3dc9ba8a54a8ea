use crate::agent::chat::context::ContextStore;
use crate::agent::chat::markdown;
use crate::agent::chat::throttle::Throttle;
use crate::agent::prompt::chat_system_prompt;
use crate::error::Result;
use crate::lark::client::MessageSender;
use crate::lark::messages::{markdown_card, ReceiveIdType};
use crate::llm::{AgentStep, LlmBroker, LlmMessage, StepObserver, ToolErrorPolicy};
use crate::mcp::tools_for;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

pub const BUSY_TEXT: &str =
    "不能同时执行多个任务，请稍后再试 / Cannot execute multiple tasks simultaneously, please try again later";
pub const THINKING_TEXT: &str = "思考中... / Thinking...";
pub const ERROR_TEXT: &str = "发生错误，请重试 / An error occurred, please try again";
pub const UPDATE_INTERVAL: Duration = Duration::from_millis(200);

/// Send a markdown card to a chat and return its message id.
pub(crate) async fn send_markdown(
    sender: &dyn MessageSender,
    chat_id: &str,
    content: &str,
) -> Result<String> {
    sender
        .send_card(ReceiveIdType::ChatId, chat_id, &markdown_card(content))
        .await
}

/// Marks a user busy for as long as it is held.
struct BusyGuard<'a> {
    running: &'a Mutex<HashSet<String>>,
    user_id: String,
}

impl<'a> BusyGuard<'a> {
    fn acquire(running: &'a Mutex<HashSet<String>>, user_id: &str) -> Option<Self> {
        let mut set = running.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(user_id.to_string()) {
            return None;
        }
        Some(Self {
            running,
            user_id: user_id.to_string(),
        })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let mut set = self.running.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.user_id);
    }
}

/// Rewrites the progress card as steps finish.
struct ProgressCard<'a> {
    sender: &'a dyn MessageSender,
    message_id: String,
    messages: Mutex<Vec<LlmMessage>>,
    throttle: Mutex<Throttle>,
}

impl ProgressCard<'_> {
    async fn update(&self, content: &str) {
        let card = markdown_card(content).to_string();
        if let Err(e) = self.sender.patch_message(&self.message_id, &card).await {
            warn!(message_id = %self.message_id, "Failed to update progress card: {}", e);
        }
    }
}

#[async_trait]
impl StepObserver for ProgressCard<'_> {
    async fn on_step(&self, step: &AgentStep) {
        let content = {
            let mut messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
            messages.extend(step.messages.iter().cloned());
            let ready = self.throttle.lock().unwrap_or_else(|e| e.into_inner()).ready();
            ready.then(|| markdown::render(&messages))
        };
        if let Some(content) = content {
            self.update(&content).await;
        }
    }
}

/// Runs the agent loop for chat users, one run per user at a time.
pub struct AgentService {
    sender: Arc<dyn MessageSender>,
    contexts: Arc<ContextStore>,
    broker: LlmBroker,
    running: Mutex<HashSet<String>>,
    update_interval: Duration,
}

impl AgentService {
    pub fn new(sender: Arc<dyn MessageSender>, contexts: Arc<ContextStore>, broker: LlmBroker) -> Self {
        Self {
            sender,
            contexts,
            broker: broker.with_tool_error_policy(ToolErrorPolicy::ReportToModel),
            running: Mutex::new(HashSet::new()),
            update_interval: UPDATE_INTERVAL,
        }
    }

    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    pub async fn generate_response(&self, user_id: &str, chat_id: &str, query: &str) -> Result<()> {
        let Some(_busy) = BusyGuard::acquire(&self.running, user_id) else {
            send_markdown(self.sender.as_ref(), chat_id, BUSY_TEXT).await?;
            return Ok(());
        };

        self.contexts
            .add_messages(user_id, vec![LlmMessage::user(query)])
            .await;

        let message_id = send_markdown(self.sender.as_ref(), chat_id, THINKING_TEXT).await?;
        let progress = ProgressCard {
            sender: self.sender.as_ref(),
            message_id,
            messages: Mutex::new(Vec::new()),
            throttle: Mutex::new(Throttle::new(self.update_interval)),
        };

        info!(user_id, chat_id, "Start handling user query");
        let outcome = async {
            let client = self.contexts.mcp_client(user_id).await?;
            let tools = tools_for(client).await?;
            // UTC date
            let mut conversation = vec![LlmMessage::system(chat_system_prompt(
                chrono::Utc::now().date_naive(),
                user_id,
                chat_id,
            ))];
            conversation.extend(self.contexts.messages(user_id).await);
            self.broker
                .run(conversation, Some(tools.as_slice()), None, Some(&progress))
                .await
        }
        .await;

        match outcome {
            Ok(run) => {
                progress.update(&markdown::render(&run.messages)).await;
                self.contexts.add_messages(user_id, run.messages).await;
                info!(user_id, iterations = run.iterations, "Handled user query");
            }
            Err(e) => {
                error!(user_id, "Agent run failed: {}", e);
                send_markdown(self.sender.as_ref(), chat_id, &format!("{}\n{}", ERROR_TEXT, e))
                    .await?;
            }
        }
        Ok(())
    }
}
