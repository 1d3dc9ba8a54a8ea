use crate::error::{LarkBotError, Result};
use crate::lark::client::MessageSender;
use crate::lark::messages::{MsgType, ReceiveIdType};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Sent {
    Message {
        receive_id_type: ReceiveIdType,
        receive_id: String,
        msg_type: MsgType,
        content: String,
    },
    Reply {
        message_id: String,
        msg_type: MsgType,
        content: String,
    },
    Patch {
        message_id: String,
        content: String,
    },
    Update {
        message_id: String,
        msg_type: MsgType,
        content: String,
    },
}

impl Sent {
    pub(crate) fn content_json(&self) -> Value {
        let content = match self {
            Sent::Message { content, .. }
            | Sent::Reply { content, .. }
            | Sent::Patch { content, .. }
            | Sent::Update { content, .. } => content,
        };
        serde_json::from_str(content).unwrap()
    }
}

/// Records outbound messages instead of calling the platform.
#[derive(Default)]
pub(crate) struct RecordingSender {
    sent: Mutex<Vec<Sent>>,
    fail: bool,
}

impl RecordingSender {
    pub(crate) fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub(crate) fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn record(&self, sent: Sent) -> Result<String> {
        if self.fail {
            return Err(LarkBotError::LarkApi {
                code: 230002,
                msg: "bot not in chat".to_string(),
                request_id: "log-1".to_string(),
            });
        }
        let mut all = self.sent.lock().unwrap();
        all.push(sent);
        Ok(format!("om_sent_{}", all.len()))
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send_message(
        &self,
        receive_id_type: ReceiveIdType,
        receive_id: &str,
        msg_type: MsgType,
        content: &str,
    ) -> Result<String> {
        self.record(Sent::Message {
            receive_id_type,
            receive_id: receive_id.to_string(),
            msg_type,
            content: content.to_string(),
        })
    }

    async fn reply_message(&self, message_id: &str, msg_type: MsgType, content: &str) -> Result<String> {
        self.record(Sent::Reply {
            message_id: message_id.to_string(),
            msg_type,
            content: content.to_string(),
        })
    }

    async fn patch_message(&self, message_id: &str, content: &str) -> Result<()> {
        self.record(Sent::Patch {
            message_id: message_id.to_string(),
            content: content.to_string(),
        })
        .map(|_| ())
    }

    async fn update_message(&self, message_id: &str, msg_type: MsgType, content: &str) -> Result<()> {
        self.record(Sent::Update {
            message_id: message_id.to_string(),
            msg_type,
            content: content.to_string(),
        })
        .map(|_| ())
    }
}
