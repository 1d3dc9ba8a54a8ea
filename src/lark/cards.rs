use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A card built from a template in the card builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    #[serde(rename = "type")]
    pub card_type: String,
    pub data: TemplateCard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateCard {
    pub template_id: String,
    pub template_variable: Map<String, Value>,
}

impl Card {
    pub fn template(template_id: impl Into<String>) -> Self {
        Self {
            card_type: "template".to_string(),
            data: TemplateCard {
                template_id: template_id.into(),
                template_variable: Map::new(),
            },
        }
    }

    pub fn variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.template_variable.insert(key.into(), value.into());
        self
    }

    /// Serialized card, ready to be sent as `interactive` content.
    pub fn to_content(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastType {
    Info,
    Success,
    Error,
    Warning,
}

/// Popup shown to the user who clicked a card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Toast {
    #[serde(rename = "type")]
    pub toast_type: ToastType,
    pub content: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub i18n: BTreeMap<String, String>,
}

impl Toast {
    pub fn new(toast_type: ToastType, content: impl Into<String>) -> Self {
        Self {
            toast_type,
            content: content.into(),
            i18n: BTreeMap::new(),
        }
    }

    pub fn i18n(mut self, locale: impl Into<String>, text: impl Into<String>) -> Self {
        self.i18n.insert(locale.into(), text.into());
        self
    }
}

/// Synchronous answer to a card action callback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardActionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toast: Option<Toast>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card: Option<Card>,
}

impl CardActionResponse {
    pub fn with_toast(mut self, toast: Toast) -> Self {
        self.toast = Some(toast);
        self
    }

    pub fn with_card(mut self, card: Card) -> Self {
        self.card = Some(card);
        self
    }
}
