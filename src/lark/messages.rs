//! Message content builders.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Kind of id a message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiveIdType {
    OpenId,
    ChatId,
    UserId,
    UnionId,
    Email,
}

impl ReceiveIdType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiveIdType::OpenId => "open_id",
            ReceiveIdType::ChatId => "chat_id",
            ReceiveIdType::UserId => "user_id",
            ReceiveIdType::UnionId => "union_id",
            ReceiveIdType::Email => "email",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MsgType {
    Text,
    Post,
    Interactive,
    System,
}

impl MsgType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MsgType::Text => "text",
            MsgType::Post => "post",
            MsgType::Interactive => "interactive",
            MsgType::System => "system",
        }
    }
}

/// Builds the content of a `text` message line by line.
#[derive(Debug, Clone, Default)]
pub struct TextMessageBuilder {
    text: String,
}

impl TextMessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text_line(mut self, line: impl AsRef<str>) -> Self {
        self.text.push_str(line.as_ref());
        self.text.push('\n');
        self
    }

    pub fn text(mut self, text: impl AsRef<str>) -> Self {
        self.text.push_str(text.as_ref());
        self
    }

    /// Serialized `{"text": ...}` content.
    pub fn build(&self) -> String {
        json!({ "text": self.text }).to_string()
    }
}

/// Content of a plain `text` message.
pub fn text_content(text: &str) -> String {
    TextMessageBuilder::new().text(text).build()
}

/// Card JSON 2.0 holding a single markdown element.
pub fn markdown_card(content: &str) -> Value {
    json!({
        "schema": "2.0",
        "config": {
            "update_multi": true,
            "streaming_mode": false
        },
        "body": {
            "direction": "vertical",
            "padding": "12px 12px 12px 12px",
            "elements": [
                {
                    "tag": "markdown",
                    "content": content,
                    "text_align": "left",
                    "text_size": "normal",
                    "margin": "0px 0px 0px 0px"
                }
            ]
        }
    })
}

/// System message drawing a "new session" divider in the chat.
pub fn divider_message() -> Value {
    json!({
        "type": "divider",
        "params": {
            "divider_text": {
                "text": "新会话",
                "i18n_text": {
                    "zh_CN": "新会话",
                    "en_US": "New Session"
                }
            }
        },
        "options": {
            "need_rollup": true
        }
    })
}

/// Text of a `text` message's content JSON, if it parses.
pub fn parse_text_content(content: &str) -> Option<String> {
    serde_json::from_str::<Value>(content)
        .ok()?
        .get("text")?
        .as_str()
        .map(String::from)
}
