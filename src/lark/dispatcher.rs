//! Routes decoded callbacks to an [`EventHandler`].
//!
//! Both transports (webhook and long connection) hand raw payload bytes to
//! [`EventDispatcher::dispatch`] and turn the [`DispatchOutcome`] into their
//! own response format.

use crate::error::{LarkBotError, Result};
use crate::lark::cards::CardActionResponse;
use crate::lark::events::*;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Redelivered events are dropped for this long after the first delivery.
pub const DEDUP_WINDOW: Duration = Duration::from_secs(300);

/// Callbacks for the events a bot subscribes to. Every method defaults to a no-op.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_message_receive(&self, _event: MessageReceiveEvent) -> Result<()> {
        Ok(())
    }

    async fn on_bot_p2p_chat_entered(&self, _event: BotP2pChatEnteredEvent) -> Result<()> {
        Ok(())
    }

    async fn on_bot_menu(&self, _event: BotMenuEvent) -> Result<()> {
        Ok(())
    }

    /// Return a toast and/or replacement card, or `None` to leave the card as is.
    async fn on_card_action(
        &self,
        _event: CardActionTriggerEvent,
    ) -> Result<Option<CardActionResponse>> {
        Ok(None)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Answer to a `url_verification` handshake.
    Challenge(String),
    /// The event was handled; card actions carry their response body.
    Handled(Option<Value>),
    /// Duplicate or unsubscribed event.
    Ignored,
}

pub struct EventDispatcher {
    handler: Arc<dyn EventHandler>,
    verification_token: Option<String>,
    seen: Mutex<HashMap<String, Instant>>,
    dedup_window: Duration,
}

impl EventDispatcher {
    pub fn new(handler: Arc<dyn EventHandler>) -> Self {
        Self {
            handler,
            verification_token: None,
            seen: Mutex::new(HashMap::new()),
            dedup_window: DEDUP_WINDOW,
        }
    }

    /// Reject payloads whose token differs from `token`.
    pub fn with_verification_token(mut self, token: Option<String>) -> Self {
        self.verification_token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    pub async fn dispatch(&self, payload: &[u8]) -> Result<DispatchOutcome> {
        let envelope: EventEnvelope = serde_json::from_slice(payload)?;

        if envelope.encrypt.is_some() {
            return Err(LarkBotError::ConfigError(
                "encrypted event payloads are not supported; disable the encrypt key".to_string(),
            ));
        }

        self.verify_token(&envelope)?;

        if envelope.is_url_verification() {
            info!("Answering url_verification challenge");
            return Ok(DispatchOutcome::Challenge(envelope.challenge.unwrap_or_default()));
        }

        let Some(header) = envelope.header else {
            warn!("Ignoring callback without a schema 2.0 header");
            return Ok(DispatchOutcome::Ignored);
        };

        if self.is_duplicate(&header.event_id) {
            info!(event_id = %header.event_id, "Ignoring redelivered event");
            return Ok(DispatchOutcome::Ignored);
        }

        let event = envelope.event.unwrap_or(Value::Null);
        info!(event_type = %header.event_type, event_id = %header.event_id, "Received event");
        debug!(payload = ?event, "Event payload");

        let outcome = self.route(&header.event_type, event).await;
        if outcome.is_err() {
            // the platform redelivers failed events; let the retry through
            self.forget(&header.event_id);
        }
        outcome
    }

    async fn route(&self, event_type: &str, event: Value) -> Result<DispatchOutcome> {
        match event_type {
            MESSAGE_RECEIVE => {
                self.handler.on_message_receive(decode(event)?).await?;
                Ok(DispatchOutcome::Handled(None))
            }
            BOT_P2P_CHAT_ENTERED => {
                self.handler.on_bot_p2p_chat_entered(decode(event)?).await?;
                Ok(DispatchOutcome::Handled(None))
            }
            BOT_MENU => {
                self.handler.on_bot_menu(decode(event)?).await?;
                Ok(DispatchOutcome::Handled(None))
            }
            CARD_ACTION_TRIGGER => {
                let response = self.handler.on_card_action(decode(event)?).await?;
                let body = serde_json::to_value(response.unwrap_or_default())?;
                Ok(DispatchOutcome::Handled(Some(body)))
            }
            other => {
                debug!(event_type = other, "No handler registered for event");
                Ok(DispatchOutcome::Ignored)
            }
        }
    }

    fn verify_token(&self, envelope: &EventEnvelope) -> Result<()> {
        let Some(expected) = &self.verification_token else {
            return Ok(());
        };
        match envelope.verification_token() {
            Some(token) if token == expected => Ok(()),
            _ => Err(LarkBotError::ProtocolError(
                "verification token mismatch".to_string(),
            )),
        }
    }

    /// Record `event_id` and report whether it was seen within the window.
    fn is_duplicate(&self, event_id: &str) -> bool {
        if event_id.is_empty() {
            return false;
        }

        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        let window = self.dedup_window;
        seen.retain(|_, at| now.duration_since(*at) < window);

        if seen.contains_key(event_id) {
            return true;
        }
        seen.insert(event_id.to_string(), now);
        false
    }

    fn forget(&self, event_id: &str) {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).remove(event_id);
    }
}

fn decode<T: DeserializeOwned>(event: Value) -> Result<T> {
    serde_json::from_value(event)
        .map_err(|e| LarkBotError::ProtocolError(format!("malformed event body: {}", e)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::lark::cards::{Toast, ToastType};
    use serde_json::json;

    #[derive(Default)]
    struct RecordingHandler {
        received: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn on_message_receive(&self, event: MessageReceiveEvent) -> Result<()> {
            if event.message.content == "fail" {
                return Err(LarkBotError::ApiError("send failed".to_string()));
            }
            self.received.lock().unwrap().push(event.message.message_id);
            Ok(())
        }

        async fn on_card_action(
            &self,
            event: CardActionTriggerEvent,
        ) -> Result<Option<CardActionResponse>> {
            self.received.lock().unwrap().push(event.operator.open_id);
            Ok(Some(
                CardActionResponse::default().with_toast(Toast::new(ToastType::Info, "ok")),
            ))
        }
    }

    pub(crate) fn message_payload(event_id: &str, content: &str) -> Vec<u8> {
        json!({
            "schema": "2.0",
            "header": {
                "event_id": event_id,
                "event_type": "im.message.receive_v1",
                "create_time": "1700000000000",
                "token": "vt",
                "app_id": "cli_test",
                "tenant_key": "tk"
            },
            "event": {
                "sender": {"sender_id": {"open_id": "ou_1"}},
                "message": {
                    "message_id": format!("om_{}", event_id),
                    "chat_id": "oc_1",
                    "chat_type": "p2p",
                    "message_type": "text",
                    "content": content
                }
            }
        })
        .to_string()
        .into_bytes()
    }

    fn dispatcher() -> (Arc<RecordingHandler>, EventDispatcher) {
        let handler = Arc::new(RecordingHandler::default());
        let dispatcher = EventDispatcher::new(handler.clone());
        (handler, dispatcher)
    }

    #[tokio::test]
    async fn test_url_verification() {
        let (_, dispatcher) = dispatcher();
        let payload = br#"{"challenge":"c-1","token":"vt","type":"url_verification"}"#;

        let outcome = dispatcher.dispatch(payload).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Challenge("c-1".to_string()));
    }

    #[tokio::test]
    async fn test_message_event_is_routed() {
        let (handler, dispatcher) = dispatcher();

        let outcome = dispatcher.dispatch(&message_payload("e1", "{}")).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::Handled(None));
        assert_eq!(*handler.received.lock().unwrap(), vec!["om_e1".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicate_event_is_ignored() {
        let (handler, dispatcher) = dispatcher();

        dispatcher.dispatch(&message_payload("e1", "{}")).await.unwrap();
        let second = dispatcher.dispatch(&message_payload("e1", "{}")).await.unwrap();

        assert_eq!(second, DispatchOutcome::Ignored);
        assert_eq!(handler.received.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_after_window_is_delivered() {
        let handler = Arc::new(RecordingHandler::default());
        let dispatcher = EventDispatcher::new(handler.clone()).with_dedup_window(Duration::ZERO);

        dispatcher.dispatch(&message_payload("e1", "{}")).await.unwrap();
        dispatcher.dispatch(&message_payload("e1", "{}")).await.unwrap();

        assert_eq!(handler.received.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_verification_token_mismatch() {
        let handler = Arc::new(RecordingHandler::default());
        let dispatcher =
            EventDispatcher::new(handler).with_verification_token(Some("other".to_string()));

        let err = dispatcher.dispatch(&message_payload("e1", "{}")).await.unwrap_err();
        assert!(matches!(err, LarkBotError::ProtocolError(_)));
    }

    #[tokio::test]
    async fn test_verification_token_match() {
        let handler = Arc::new(RecordingHandler::default());
        let dispatcher =
            EventDispatcher::new(handler).with_verification_token(Some("vt".to_string()));

        assert!(dispatcher.dispatch(&message_payload("e1", "{}")).await.is_ok());
    }

    #[tokio::test]
    async fn test_encrypted_payload_is_rejected() {
        let (_, dispatcher) = dispatcher();
        let err = dispatcher.dispatch(br#"{"encrypt":"abcdef"}"#).await.unwrap_err();
        assert!(matches!(err, LarkBotError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_unknown_event_is_ignored() {
        let (_, dispatcher) = dispatcher();
        let payload = json!({
            "schema": "2.0",
            "header": {"event_id": "e9", "event_type": "contact.user.created_v3"},
            "event": {}
        })
        .to_string();

        let outcome = dispatcher.dispatch(payload.as_bytes()).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let (_, dispatcher) = dispatcher();
        let err = dispatcher.dispatch(&message_payload("e2", "fail")).await.unwrap_err();
        assert!(matches!(err, LarkBotError::ApiError(_)));
    }

    /// Fails the first delivery of every message, then succeeds.
    #[derive(Default)]
    struct FlakyHandler {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl EventHandler for FlakyHandler {
        async fn on_message_receive(&self, _event: MessageReceiveEvent) -> Result<()> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls == 1 {
                return Err(LarkBotError::ApiError("transient".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_redelivery_after_handler_failure_is_handled() {
        let handler = Arc::new(FlakyHandler::default());
        let dispatcher = EventDispatcher::new(handler.clone());

        assert!(dispatcher.dispatch(&message_payload("e5", "{}")).await.is_err());
        let retry = dispatcher.dispatch(&message_payload("e5", "{}")).await.unwrap();
        let again = dispatcher.dispatch(&message_payload("e5", "{}")).await.unwrap();

        assert_eq!(retry, DispatchOutcome::Handled(None));
        assert_eq!(again, DispatchOutcome::Ignored);
        assert_eq!(*handler.calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_card_action_returns_response_body() {
        let (handler, dispatcher) = dispatcher();
        let payload = json!({
            "schema": "2.0",
            "header": {"event_id": "e3", "event_type": "card.action.trigger"},
            "event": {
                "operator": {"open_id": "ou_7"},
                "action": {"value": {"action": "send_alarm"}, "tag": "button"}
            }
        })
        .to_string();

        let outcome = dispatcher.dispatch(payload.as_bytes()).await.unwrap();

        assert_eq!(
            outcome,
            DispatchOutcome::Handled(Some(json!({"toast": {"type": "info", "content": "ok"}})))
        );
        assert_eq!(*handler.received.lock().unwrap(), vec!["ou_7".to_string()]);
    }

    #[tokio::test]
    async fn test_malformed_event_body() {
        let (_, dispatcher) = dispatcher();
        let payload = json!({
            "schema": "2.0",
            "header": {"event_id": "e4", "event_type": "application.bot.menu_v6"},
            "event": {"event_key": 5}
        })
        .to_string();

        let err = dispatcher.dispatch(payload.as_bytes()).await.unwrap_err();
        assert!(err.to_string().contains("malformed event body"));
    }
}
