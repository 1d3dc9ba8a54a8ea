//! Alarm bot: sends an alarm card on demand and resolves it from a card button.

use crate::config::CardTemplates;
use crate::error::Result;
use crate::lark::cards::{Card, CardActionResponse, Toast, ToastType};
use crate::lark::client::MessageSender;
use crate::lark::dispatcher::EventHandler;
use crate::lark::events::{
    BotMenuEvent, BotP2pChatEnteredEvent, CardActionTriggerEvent, MessageReceiveEvent,
};
use crate::lark::messages::ReceiveIdType;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

pub const SEND_ALARM: &str = "send_alarm";
pub const COMPLETE_ALARM: &str = "complete_alarm";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn now() -> String {
    chrono::Local::now().format(TIME_FORMAT).to_string()
}

pub struct CardInteractionBot {
    sender: Arc<dyn MessageSender>,
    templates: CardTemplates,
}

impl CardInteractionBot {
    pub fn new(sender: Arc<dyn MessageSender>, templates: CardTemplates) -> Self {
        Self { sender, templates }
    }

    async fn send_welcome_card(&self, open_id: &str) -> Result<()> {
        let card = Card::template(&self.templates.welcome).variable("open_id", open_id);
        self.sender
            .send_template_card(ReceiveIdType::OpenId, open_id, &card)
            .await?;
        Ok(())
    }

    async fn send_alarm_card(&self, receive_id_type: ReceiveIdType, receive_id: &str) -> Result<()> {
        let card = Card::template(&self.templates.alarm).variable("alarm_time", now());
        self.sender
            .send_template_card(receive_id_type, receive_id, &card)
            .await?;
        info!(receive_id, "Alarm card sent");
        Ok(())
    }

    fn resolved_response(&self, event: &CardActionTriggerEvent) -> CardActionResponse {
        let notes = match event.action.form_field("notes_input") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        let alarm_time = event.action.value.get("time").cloned().unwrap_or(Value::Null);

        let card = Card::template(&self.templates.resolved)
            .variable("alarm_time", alarm_time)
            .variable("open_id", event.operator.open_id.as_str())
            .variable("complete_time", now())
            .variable("notes", notes);

        CardActionResponse::default()
            .with_toast(
                Toast::new(ToastType::Info, "已处理完成！")
                    .i18n("zh_cn", "已处理完成！")
                    .i18n("en_us", "Resolved!"),
            )
            .with_card(card)
    }
}

#[async_trait]
impl EventHandler for CardInteractionBot {
    async fn on_bot_p2p_chat_entered(&self, event: BotP2pChatEnteredEvent) -> Result<()> {
        self.send_welcome_card(&event.operator_id.open_id).await
    }

    async fn on_bot_menu(&self, event: BotMenuEvent) -> Result<()> {
        if event.event_key == SEND_ALARM {
            self.send_alarm_card(ReceiveIdType::OpenId, &event.operator.operator_id.open_id)
                .await?;
        } else {
            debug!(event_key = %event.event_key, "Unhandled menu");
        }
        Ok(())
    }

    async fn on_message_receive(&self, event: MessageReceiveEvent) -> Result<()> {
        let message = &event.message;
        if message.is_group() {
            self.send_alarm_card(ReceiveIdType::ChatId, &message.chat_id).await
        } else if message.is_p2p() {
            self.send_alarm_card(ReceiveIdType::OpenId, &event.sender.sender_id.open_id)
                .await
        } else {
            Ok(())
        }
    }

    async fn on_card_action(
        &self,
        event: CardActionTriggerEvent,
    ) -> Result<Option<CardActionResponse>> {
        match event.action.name() {
            Some(SEND_ALARM) => {
                self.send_alarm_card(ReceiveIdType::OpenId, &event.operator.open_id)
                    .await?;
                Ok(Some(CardActionResponse::default()))
            }
            Some(COMPLETE_ALARM) => Ok(Some(self.resolved_response(&event))),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bots::mock::{RecordingSender, Sent};
    use crate::lark::events::*;
    use serde_json::json;

    fn templates() -> CardTemplates {
        CardTemplates {
            welcome: "tpl_welcome".into(),
            alarm: "tpl_alarm".into(),
            resolved: "tpl_resolved".into(),
            ..Default::default()
        }
    }

    fn bot() -> (Arc<RecordingSender>, CardInteractionBot) {
        let sender = Arc::new(RecordingSender::default());
        (sender.clone(), CardInteractionBot::new(sender, templates()))
    }

    fn user(open_id: &str) -> UserId {
        UserId {
            open_id: open_id.into(),
            ..Default::default()
        }
    }

    fn card_action(value: Value, form_value: Option<Value>) -> CardActionTriggerEvent {
        CardActionTriggerEvent {
            operator: CardOperator {
                open_id: "ou_op".into(),
                ..Default::default()
            },
            action: CardAction {
                value,
                tag: "button".into(),
                form_value: form_value.and_then(|v| v.as_object().cloned()),
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_welcome_card_on_p2p_entered() {
        let (sender, bot) = bot();
        bot.on_bot_p2p_chat_entered(BotP2pChatEnteredEvent {
            operator_id: user("ou_1"),
            ..Default::default()
        })
        .await
        .unwrap();

        let sent = sender.sent();
        let content = sent[0].content_json();
        assert_eq!(content["data"]["template_id"], "tpl_welcome");
        assert_eq!(content["data"]["template_variable"]["open_id"], "ou_1");
        assert!(matches!(
            &sent[0],
            Sent::Message { receive_id_type: ReceiveIdType::OpenId, receive_id, .. } if receive_id == "ou_1"
        ));
    }

    #[tokio::test]
    async fn test_menu_send_alarm() {
        let (sender, bot) = bot();
        bot.on_bot_menu(BotMenuEvent {
            operator: MenuOperator {
                operator_id: user("ou_2"),
                operator_name: None,
            },
            event_key: SEND_ALARM.into(),
            timestamp: None,
        })
        .await
        .unwrap();

        let content = sender.sent()[0].content_json();
        assert_eq!(content["data"]["template_id"], "tpl_alarm");
        let alarm_time = content["data"]["template_variable"]["alarm_time"].as_str().unwrap();
        assert!(chrono::NaiveDateTime::parse_from_str(alarm_time, TIME_FORMAT).is_ok());
    }

    #[tokio::test]
    async fn test_other_menu_is_ignored() {
        let (sender, bot) = bot();
        bot.on_bot_menu(BotMenuEvent {
            event_key: "other".into(),
            ..Default::default()
        })
        .await
        .unwrap();
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn test_message_routes_by_chat_type() {
        let (sender, bot) = bot();
        let mut event = MessageReceiveEvent {
            sender: EventSender {
                sender_id: user("ou_3"),
                sender_type: "user".into(),
            },
            message: EventMessage {
                message_id: "om_1".into(),
                chat_id: "oc_9".into(),
                chat_type: "group".into(),
                message_type: "text".into(),
                content: "{}".into(),
                ..Default::default()
            },
        };
        bot.on_message_receive(event.clone()).await.unwrap();
        event.message.chat_type = "p2p".into();
        bot.on_message_receive(event).await.unwrap();

        let sent = sender.sent();
        assert!(matches!(
            &sent[0],
            Sent::Message { receive_id_type: ReceiveIdType::ChatId, receive_id, .. } if receive_id == "oc_9"
        ));
        assert!(matches!(
            &sent[1],
            Sent::Message { receive_id_type: ReceiveIdType::OpenId, receive_id, .. } if receive_id == "ou_3"
        ));
    }

    #[tokio::test]
    async fn test_send_alarm_action_keeps_card() {
        let (sender, bot) = bot();
        let response = bot
            .on_card_action(card_action(json!({"action": "send_alarm"}), None))
            .await
            .unwrap();

        assert_eq!(response, Some(CardActionResponse::default()));
        assert_eq!(sender.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_complete_alarm_returns_resolved_card() {
        let (_, bot) = bot();
        let response = bot
            .on_card_action(card_action(
                json!({"action": "complete_alarm", "time": "2024-05-01 08:00:00"}),
                Some(json!({"notes_input": "restarted service"})),
            ))
            .await
            .unwrap()
            .unwrap();

        let toast = response.toast.unwrap();
        assert_eq!(toast.toast_type, ToastType::Info);
        assert_eq!(toast.i18n["en_us"], "Resolved!");

        let card = response.card.unwrap();
        let vars = &card.data.template_variable;
        assert_eq!(card.data.template_id, "tpl_resolved");
        assert_eq!(vars["alarm_time"], "2024-05-01 08:00:00");
        assert_eq!(vars["open_id"], "ou_op");
        assert_eq!(vars["notes"], "restarted service");
        assert!(vars["complete_time"].is_string());
    }

    #[tokio::test]
    async fn test_complete_alarm_without_notes() {
        let (_, bot) = bot();
        let response = bot
            .on_card_action(card_action(json!({"action": "complete_alarm"}), None))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.card.unwrap().data.template_variable["notes"], "");
    }

    #[tokio::test]
    async fn test_unknown_action_returns_none() {
        let (_, bot) = bot();
        let response = bot.on_card_action(card_action(json!({"action": "x"}), None)).await.unwrap();
        assert!(response.is_none());
    }
}
