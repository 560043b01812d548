use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::intent::{Entities, Intent};
use crate::domain::session::SessionId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Operator,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Operator => "operator",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            "operator" => Some(Self::Operator),
            _ => None,
        }
    }
}

/// An immutable conversation entry.
///
/// `sequence` is the message's position within its session: the welcome
/// message is 0 and every later message takes `message_count + 1` at the
/// time it is written. `(session_id, sequence)` is unique.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    pub sequence: u32,
    pub role: MessageRole,
    pub content: String,
    pub intent: Option<Intent>,
    pub confidence: Option<f64>,
    pub entities: Option<Entities>,
    pub referenced_order_id: Option<String>,
    pub referenced_product_id: Option<String>,
    pub is_auto_reply: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        session_id: SessionId,
        sequence: u32,
        role: MessageRole,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            session_id,
            sequence,
            role,
            content: content.into(),
            intent: None,
            confidence: None,
            entities: None,
            referenced_order_id: None,
            referenced_product_id: None,
            is_auto_reply: false,
            created_at,
        }
    }

    pub fn with_classification(mut self, intent: Intent, confidence: f64, entities: Entities) -> Self {
        self.intent = Some(intent);
        self.confidence = Some(confidence);
        self.entities = (!entities.is_empty()).then_some(entities);
        self
    }

    pub fn with_references(
        mut self,
        order_id: Option<String>,
        product_id: Option<String>,
    ) -> Self {
        self.referenced_order_id = order_id;
        self.referenced_product_id = product_id;
        self
    }

    pub fn auto_reply(mut self) -> Self {
        self.is_auto_reply = true;
        self
    }
}
