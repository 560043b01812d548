use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey(pub String);

impl SessionKey {
    /// `marketplace_customer`, or `marketplace_anon-<millis>` when the customer is unknown.
    pub fn derive(marketplace: &str, customer_id: Option<&str>, now: DateTime<Utc>) -> Self {
        let customer_part = match customer_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(customer_id) => customer_id.to_string(),
            None => format!("anon-{}", now.timestamp_millis()),
        };
        Self(format!("{marketplace}_{customer_part}"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    Waiting,
    Escalated,
    Resolved,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Waiting => "waiting",
            Self::Escalated => "escalated",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "waiting" => Some(Self::Waiting),
            "escalated" => Some(Self::Escalated),
            "resolved" => Some(Self::Resolved),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    /// Statuses a session key may be reused from.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Active | Self::Waiting)
    }

    /// Statuses that refuse automated turns until re-activated.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Closed)
    }
}

pub const CONTEXT_ORDER_ID: &str = "orderId";
pub const CONTEXT_ORDER_INFO: &str = "orderInfo";
pub const CONTEXT_TRACKING_NUMBER: &str = "trackingNumber";
pub const CONTEXT_PRODUCT_ID: &str = "productId";
pub const CONTEXT_PRODUCT_INFO: &str = "productInfo";

/// Accumulated facts attached to a session, persisted as a JSON object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionContext(pub Map<String, Value>);

impl SessionContext {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str).filter(|value| !value.is_empty())
    }

    pub fn order_id(&self) -> Option<&str> {
        self.get_str(CONTEXT_ORDER_ID)
    }

    pub fn product_id(&self) -> Option<&str> {
        self.get_str(CONTEXT_PRODUCT_ID)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Patch keys overwrite same-named keys; every other key is kept.
    pub fn merge(&mut self, patch: ContextPatch) {
        for (key, value) in patch.0 {
            self.0.insert(key, value);
        }
    }

    pub fn merged(&self, patch: ContextPatch) -> Self {
        let mut merged = self.clone();
        merged.merge(patch);
        merged
    }
}

/// Keys produced by one enrichment pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextPatch(pub Map<String, Value>);

impl ContextPatch {
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub session_key: SessionKey,
    pub marketplace: String,
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_locale: String,
    pub context: SessionContext,
    pub status: SessionStatus,
    pub message_count: u32,
    pub is_escalated: bool,
    pub escalated_at: Option<DateTime<Utc>>,
    pub escalation_reason: Option<String>,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;

        matches!(
            (self.status, next),
            (Active | Waiting, Escalated)
                | (Active | Waiting | Escalated, Resolved)
                | (Active | Waiting | Escalated | Resolved, Closed)
                | (Waiting | Escalated | Resolved, Active)
        )
    }

    pub fn transition_to(&mut self, next: SessionStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidSessionTransition { from: self.status, to: next })
    }

    pub fn escalate(&mut self, reason: impl Into<String>, at: DateTime<Utc>) {
        self.is_escalated = true;
        self.escalated_at = Some(at);
        self.escalation_reason = Some(reason.into());
        self.status = SessionStatus::Escalated;
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::{
        ContextPatch, Session, SessionContext, SessionId, SessionKey, SessionStatus,
    };
    use crate::errors::DomainError;

    fn session(status: SessionStatus) -> Session {
        let now = Utc::now();
        Session {
            id: SessionId("S-1".to_string()),
            session_key: SessionKey("amazon_C-1".to_string()),
            marketplace: "amazon".to_string(),
            customer_id: Some("C-1".to_string()),
            customer_name: None,
            customer_email: None,
            customer_locale: "en".to_string(),
            context: SessionContext::default(),
            status,
            message_count: 0,
            is_escalated: false,
            escalated_at: None,
            escalation_reason: None,
            last_message_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn session_key_uses_customer_id_when_present() {
        let key = SessionKey::derive("amazon", Some("C-42"), Utc::now());
        assert_eq!(key.0, "amazon_C-42");
    }

    #[test]
    fn session_key_falls_back_to_timestamp_for_anonymous_customers() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let key = SessionKey::derive("ebay", Some("   "), now);
        assert_eq!(key.0, format!("ebay_anon-{}", now.timestamp_millis()));
    }

    #[test]
    fn context_merge_augments_instead_of_replacing() {
        let mut context = SessionContext::default();
        context.insert("productId", json!("P-1"));
        context.insert("orderId", json!("99210"));

        let mut patch = ContextPatch::default();
        patch.set("orderId", json!("ord_canonical"));
        patch.set("orderInfo", json!({ "status": "shipped" }));
        context.merge(patch);

        assert_eq!(context.product_id(), Some("P-1"));
        assert_eq!(context.order_id(), Some("ord_canonical"));
        assert!(context.get("orderInfo").is_some());
    }

    #[test]
    fn escalated_sessions_can_be_resolved_then_closed() {
        let mut session = session(SessionStatus::Escalated);
        session.transition_to(SessionStatus::Resolved).expect("escalated -> resolved");
        session.transition_to(SessionStatus::Closed).expect("resolved -> closed");
        assert_eq!(session.status, SessionStatus::Closed);
    }

    #[test]
    fn closed_sessions_cannot_be_reactivated() {
        let mut session = session(SessionStatus::Closed);
        let error =
            session.transition_to(SessionStatus::Active).expect_err("closed -> active should fail");
        assert!(matches!(
            error,
            DomainError::InvalidSessionTransition {
                from: SessionStatus::Closed,
                to: SessionStatus::Active
            }
        ));
    }

    #[test]
    fn resolved_sessions_reactivate_explicitly() {
        let mut session = session(SessionStatus::Resolved);
        session.transition_to(SessionStatus::Active).expect("resolved -> active");
        assert!(session.status.is_open());
    }

    #[test]
    fn escalate_records_reason_and_timestamp() {
        let mut session = session(SessionStatus::Active);
        let at = Utc::now();
        session.escalate("Customer complaint detected.", at);

        assert!(session.is_escalated);
        assert_eq!(session.status, SessionStatus::Escalated);
        assert_eq!(session.escalated_at, Some(at));
        assert_eq!(session.escalation_reason.as_deref(), Some("Customer complaint detected."));
    }
}
