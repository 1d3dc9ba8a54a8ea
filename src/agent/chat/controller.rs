use crate::agent::chat::context::{ContextStore, LOGIN_POLL_INTERVAL, LOGIN_TIMEOUT};
use crate::agent::chat::service::{send_markdown, AgentService};
use crate::error::Result;
use crate::lark::client::MessageSender;
use crate::lark::dispatcher::EventHandler;
use crate::lark::events::MessageReceiveEvent;
use crate::lark::messages::{divider_message, parse_text_content, MsgType, ReceiveIdType};
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, error, info};

pub const CLEAR_COMMAND: &str = "/clear";
pub const CLEARED_TEXT: &str = "成功清除用户上下文 / Successfully cleared user context";
pub const LOGIN_TIMEOUT_TEXT: &str = "登录超时，请重试 / Login timeout, please try again";
pub const UNSUPPORTED_TEXT: &str = "请发送文本消息 / Please send text message";

/// Scopes requested when a user authorises the bot.
pub const OAUTH_SCOPES: &[&str] = &[
    "im:chat:read",
    "im:chat.members:read",
    "im:message:readonly",
    "wiki:wiki:readonly",
    "docx:document:readonly",
    "docx:document:create",
    "search:docs:read",
    "docs:document:import",
    "docs:document.media:upload",
    "docs:permission.member:create",
    "base:app:create",
    "base:table:create",
    "base:table:read",
    "base:field:read",
    "base:record:retrieve",
    "base:record:create",
    "base:record:update",
    "contact:user.id:readonly",
];

/// What an incoming message asks of the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intake {
    Query(String),
    Unsupported,
    Empty,
}

fn mention_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"@_user_\d+").ok()).as_ref()
}

/// Turn a message into a query. Mention placeholders are dropped from text;
/// rich-text posts are passed through as their JSON.
pub fn parse_query(message_type: &str, content: &str) -> Intake {
    let query = match message_type {
        "text" => {
            let text = parse_text_content(content).unwrap_or_default();
            match mention_pattern() {
                Some(pattern) => pattern.replace_all(&text, "").trim().to_string(),
                None => text.trim().to_string(),
            }
        }
        "post" => content.trim().to_string(),
        _ => return Intake::Unsupported,
    };

    if query.is_empty() {
        Intake::Empty
    } else {
        Intake::Query(query)
    }
}

/// Routes chat messages: commands, the login gate, then the agent.
#[derive(Clone)]
pub struct ChatController {
    sender: Arc<dyn MessageSender>,
    contexts: Arc<ContextStore>,
    agent: Arc<AgentService>,
    authorize_url: String,
    login_timeout: Duration,
    login_poll: Duration,
}

impl ChatController {
    pub fn new(
        sender: Arc<dyn MessageSender>,
        contexts: Arc<ContextStore>,
        agent: Arc<AgentService>,
        authorize_url: impl Into<String>,
    ) -> Self {
        Self {
            sender,
            contexts,
            agent,
            authorize_url: authorize_url.into(),
            login_timeout: LOGIN_TIMEOUT,
            login_poll: LOGIN_POLL_INTERVAL,
        }
    }

    pub fn with_login_wait(mut self, timeout: Duration, poll: Duration) -> Self {
        self.login_timeout = timeout;
        self.login_poll = poll;
        self
    }

    pub async fn handle_query(&self, user_id: &str, chat_id: &str, query: &str) -> Result<()> {
        if query.starts_with(CLEAR_COMMAND) {
            self.contexts.clear_messages(user_id).await;
            send_markdown(self.sender.as_ref(), chat_id, CLEARED_TEXT).await?;
            self.sender
                .send_message(
                    ReceiveIdType::ChatId,
                    chat_id,
                    MsgType::System,
                    &divider_message().to_string(),
                )
                .await?;
            return Ok(());
        }

        if !self.contexts.is_logged_in(user_id).await {
            let prompt = format!(
                "请点击 {url} 登录 / Please click {url} to login",
                url = self.authorize_url
            );
            send_markdown(self.sender.as_ref(), chat_id, &prompt).await?;

            if !self
                .contexts
                .wait_login(user_id, self.login_timeout, self.login_poll)
                .await
            {
                info!(user_id, "Login timed out");
                send_markdown(self.sender.as_ref(), chat_id, LOGIN_TIMEOUT_TEXT).await?;
                return Ok(());
            }
        }

        self.agent.generate_response(user_id, chat_id, query).await
    }

    pub async fn handle_message(&self, event: MessageReceiveEvent) -> Result<()> {
        let user_id = &event.sender.sender_id.open_id;
        let chat_id = &event.message.chat_id;

        match parse_query(&event.message.message_type, &event.message.content) {
            Intake::Query(query) => self.handle_query(user_id, chat_id, &query).await,
            Intake::Unsupported => {
                self.sender
                    .send_text(ReceiveIdType::ChatId, chat_id, UNSUPPORTED_TEXT)
                    .await?;
                Ok(())
            }
            Intake::Empty => {
                debug!(message_id = %event.message.message_id, "Ignoring empty message");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl EventHandler for ChatController {
    async fn on_message_receive(&self, event: MessageReceiveEvent) -> Result<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            let message_id = event.message.message_id.clone();
            if let Err(e) = controller.handle_message(event).await {
                error!(message_id = %message_id, "Failed to handle message: {}", e);
            }
        });
        Ok(())
    }
}
