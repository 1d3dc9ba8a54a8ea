//! Event payloads delivered by the platform.
//!
//! Only the fields the bots read are modeled; everything else is ignored
//! during deserialization.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const MESSAGE_RECEIVE: &str = "im.message.receive_v1";
pub const BOT_P2P_CHAT_ENTERED: &str = "im.chat.access_event.bot_p2p_chat_entered_v1";
pub const BOT_MENU: &str = "application.bot.menu_v6";
pub const CARD_ACTION_TRIGGER: &str = "card.action.trigger";

/// Outer body of every callback, both schema 2.0 events and the
/// `url_verification` handshake.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventEnvelope {
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub header: Option<EventHeader>,
    #[serde(default)]
    pub event: Option<Value>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub challenge: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub encrypt: Option<String>,
}

impl EventEnvelope {
    pub fn is_url_verification(&self) -> bool {
        self.kind.as_deref() == Some("url_verification")
    }

    /// Verification token, wherever this payload carries it.
    pub fn verification_token(&self) -> Option<&str> {
        self.header
            .as_ref()
            .map(|h| h.token.as_str())
            .filter(|t| !t.is_empty())
            .or(self.token.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventHeader {
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub create_time: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub tenant_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserId {
    #[serde(default)]
    pub open_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub union_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageReceiveEvent {
    pub sender: EventSender,
    pub message: EventMessage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventSender {
    #[serde(default)]
    pub sender_id: UserId,
    #[serde(default)]
    pub sender_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventMessage {
    pub message_id: String,
    #[serde(default)]
    pub root_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub create_time: String,
    pub chat_id: String,
    /// `p2p` or `group`.
    pub chat_type: String,
    pub message_type: String,
    /// JSON-encoded body, shaped by `message_type`.
    pub content: String,
    #[serde(default)]
    pub mentions: Vec<Mention>,
}

impl EventMessage {
    pub fn is_p2p(&self) -> bool {
        self.chat_type == "p2p"
    }

    pub fn is_group(&self) -> bool {
        self.chat_type == "group"
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mention {
    pub key: String,
    #[serde(default)]
    pub id: UserId,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotP2pChatEnteredEvent {
    #[serde(default)]
    pub chat_id: String,
    pub operator_id: UserId,
    #[serde(default)]
    pub last_message_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotMenuEvent {
    pub operator: MenuOperator,
    pub event_key: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MenuOperator {
    pub operator_id: UserId,
    #[serde(default)]
    pub operator_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardActionTriggerEvent {
    pub operator: CardOperator,
    #[serde(default)]
    pub token: String,
    pub action: CardAction,
    #[serde(default)]
    pub context: Option<CardContext>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardOperator {
    pub open_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub union_id: Option<String>,
    #[serde(default)]
    pub tenant_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardAction {
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub form_value: Option<Map<String, Value>>,
}

impl CardAction {
    /// The `action` key the card builder attached to the clicked element.
    pub fn name(&self) -> Option<&str> {
        self.value.get("action").and_then(Value::as_str)
    }

    pub fn form_field(&self, key: &str) -> Option<&Value> {
        self.form_value.as_ref()?.get(key)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardContext {
    #[serde(default)]
    pub open_message_id: String,
    #[serde(default)]
    pub open_chat_id: String,
}
