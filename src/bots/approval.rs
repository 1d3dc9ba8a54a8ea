use crate::config::CardTemplates;
use crate::error::Result;
use crate::lark::cards::{Card, CardActionResponse, Toast, ToastType};
use crate::lark::client::MessageSender;
use crate::lark::dispatcher::EventHandler;
use crate::lark::events::{BotMenuEvent, BotP2pChatEnteredEvent, CardActionTriggerEvent};
use crate::lark::messages::ReceiveIdType;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

pub const START_APPROVAL: &str = "start_approval";
pub const CONFIRM_APPROVAL: &str = "confirm_approval";

/// Sends an approval card and flips it to "approved" when confirmed.
pub struct ApprovalBot {
    sender: Arc<dyn MessageSender>,
    templates: CardTemplates,
}

impl ApprovalBot {
    pub fn new(sender: Arc<dyn MessageSender>, templates: CardTemplates) -> Self {
        Self { sender, templates }
    }

    async fn send_approving_card(&self, open_id: &str) -> Result<()> {
        let card = Card::template(&self.templates.approving).variable("user_ids", json!([open_id]));
        self.sender
            .send_template_card(ReceiveIdType::OpenId, open_id, &card)
            .await?;
        info!(open_id, "Approval card sent");
        Ok(())
    }
}

#[async_trait]
impl EventHandler for ApprovalBot {
    async fn on_bot_p2p_chat_entered(&self, event: BotP2pChatEnteredEvent) -> Result<()> {
        self.send_approving_card(&event.operator_id.open_id).await
    }

    async fn on_bot_menu(&self, event: BotMenuEvent) -> Result<()> {
        if event.event_key == START_APPROVAL {
            self.send_approving_card(&event.operator.operator_id.open_id).await?;
        }
        Ok(())
    }

    async fn on_card_action(
        &self,
        event: CardActionTriggerEvent,
    ) -> Result<Option<CardActionResponse>> {
        if event.action.name() != Some(CONFIRM_APPROVAL) {
            return Ok(None);
        }

        let mut card = Card::template(&self.templates.approved)
            .variable("user_ids", json!([event.operator.open_id]));
        if let Some(notes) = event.action.form_field("notes_input") {
            card = card.variable("notes", notes.clone());
        }

        Ok(Some(
            CardActionResponse::default()
                .with_toast(
                    Toast::new(ToastType::Success, "Approved!")
                        .i18n("zh_cn", "已同意！")
                        .i18n("en_us", "Approved!"),
                )
                .with_card(card),
        ))
    }
}
