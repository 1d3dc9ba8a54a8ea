use crate::error::{LarkBotError, Result};
use crate::lark::client::MessageSender;
use crate::lark::dispatcher::EventHandler;
use crate::lark::events::MessageReceiveEvent;
use crate::lark::messages::{parse_text_content, MsgType, ReceiveIdType, TextMessageBuilder};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

pub const PARSE_FAILED_TEXT: &str =
    "解析消息失败，请发送文本消息\nparse message failed, please send text message";

/// Repeats every text message back to the chat it came from.
pub struct EchoBot {
    sender: Arc<dyn MessageSender>,
}

impl EchoBot {
    pub fn new(sender: Arc<dyn MessageSender>) -> Self {
        Self { sender }
    }

    /// Reply content for a received message.
    pub fn echo_content(message_type: &str, content: &str) -> String {
        let text = if message_type == "text" {
            parse_text_content(content).unwrap_or_else(|| PARSE_FAILED_TEXT.to_string())
        } else {
            PARSE_FAILED_TEXT.to_string()
        };

        TextMessageBuilder::new()
            .text_line(format!("收到你发送的消息: {}", text))
            .text_line(format!("Received message: {}", text))
            .build()
    }
}

#[async_trait]
impl EventHandler for EchoBot {
    async fn on_message_receive(&self, event: MessageReceiveEvent) -> Result<()> {
        let message = &event.message;
        let content = Self::echo_content(&message.message_type, &message.content);

        let result = if message.is_p2p() {
            self.sender
                .send_message(ReceiveIdType::ChatId, &message.chat_id, MsgType::Text, &content)
                .await
        } else {
            self.sender
                .reply_message(&message.message_id, MsgType::Text, &content)
                .await
        };

        match result {
            Ok(message_id) => info!(message_id = %message_id, "Echo sent"),
            Err(LarkBotError::LarkApi { code, msg, request_id }) => {
                error!(code, msg = %msg, request_id = %request_id, "Failed to send echo");
            }
            Err(e) => error!("Failed to send echo: {}", e),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bots::mock::{RecordingSender, Sent};
    use crate::lark::events::{EventMessage, EventSender};
    use serde_json::Value;

    fn event(chat_type: &str, message_type: &str, content: &str) -> MessageReceiveEvent {
        MessageReceiveEvent {
            sender: EventSender::default(),
            message: EventMessage {
                message_id: "om_1".into(),
                chat_id: "oc_1".into(),
                chat_type: chat_type.into(),
                message_type: message_type.into(),
                content: content.into(),
                ..Default::default()
            },
        }
    }

    fn text_of(content: &str) -> String {
        let value: Value = serde_json::from_str(content).unwrap();
        value["text"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_p2p_text_is_sent_to_chat() {
        let sender = Arc::new(RecordingSender::default());
        let bot = EchoBot::new(sender.clone());

        bot.on_message_receive(event("p2p", "text", r#"{"text":"hello"}"#)).await.unwrap();

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Sent::Message { receive_id_type, receive_id, msg_type, content } => {
                assert_eq!(*receive_id_type, ReceiveIdType::ChatId);
                assert_eq!(receive_id, "oc_1");
                assert_eq!(*msg_type, MsgType::Text);
                assert_eq!(text_of(content), "收到你发送的消息: hello\nReceived message: hello\n");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_group_text_is_replied() {
        let sender = Arc::new(RecordingSender::default());
        let bot = EchoBot::new(sender.clone());

        bot.on_message_receive(event("group", "text", r#"{"text":"hi all"}"#)).await.unwrap();

        match &sender.sent()[0] {
            Sent::Reply { message_id, content, .. } => {
                assert_eq!(message_id, "om_1");
                assert!(text_of(content).contains("Received message: hi all"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_text_message_gets_parse_failure() {
        let content = EchoBot::echo_content("image", r#"{"image_key":"img_1"}"#);
        assert!(text_of(&content).contains("parse message failed, please send text message"));
    }

    #[tokio::test]
    async fn test_malformed_text_gets_parse_failure() {
        let content = EchoBot::echo_content("text", "not json");
        assert!(text_of(&content).starts_with("收到你发送的消息: 解析消息失败"));
    }

    #[tokio::test]
    async fn test_send_failure_is_swallowed() {
        let sender = Arc::new(RecordingSender::failing());
        let bot = EchoBot::new(sender.clone());

        let result = bot.on_message_receive(event("p2p", "text", r#"{"text":"x"}"#)).await;
        assert!(result.is_ok());
    }
}
