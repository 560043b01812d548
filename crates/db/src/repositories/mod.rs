use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use bazaar_core::domain::message::Message;
use bazaar_core::domain::order::OrderSummary;
use bazaar_core::domain::product::{ProductId, ProductSummary};
use bazaar_core::domain::session::{Session, SessionContext, SessionId, SessionKey};
use bazaar_core::domain::support_config::SupportConfig;

pub mod memory;
pub mod message;
pub mod order;
pub mod product;
pub mod session;
pub mod support_config;

pub use memory::{
    InMemoryConversationStore, InMemoryOrderRepository, InMemoryProductRepository,
    InMemorySupportConfigRepository,
};
pub use message::SqlMessageRepository;
pub use order::SqlOrderRepository;
pub use product::SqlProductRepository;
pub use session::SqlSessionRepository;
pub use support_config::SqlSupportConfigRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("write conflict: {0}")]
    Conflict(String),
}

/// Result of inserting a new session together with its welcome message.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionCreation {
    Created(Session),
    /// Another writer opened a session for the same key first.
    Existing(Session),
}

impl SessionCreation {
    pub fn into_session(self) -> Session {
        match self {
            Self::Created(session) | Self::Existing(session) => session,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EscalationMark {
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// One atomic write against a session: append `messages`, advance
/// `message_count` by their number, and optionally replace the context or
/// mark the session escalated.
///
/// The write only applies while the stored `message_count` still equals
/// `expected_message_count`.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnRecord {
    pub session_id: SessionId,
    pub expected_message_count: u32,
    pub messages: Vec<Message>,
    pub context: Option<SessionContext>,
    pub escalation: Option<EscalationMark>,
    pub recorded_at: DateTime<Utc>,
}

impl TurnRecord {
    pub fn next_message_count(&self) -> u32 {
        self.expected_message_count + self.messages.len() as u32
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TurnOutcome {
    Recorded(Session),
    /// The same turn was already persisted; nothing was written.
    AlreadyRecorded(Session),
}

impl TurnOutcome {
    pub fn session(&self) -> &Session {
        match self {
            Self::Recorded(session) | Self::AlreadyRecorded(session) => session,
        }
    }

    pub fn into_session(self) -> Session {
        match self {
            Self::Recorded(session) | Self::AlreadyRecorded(session) => session,
        }
    }
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError>;

    /// The ACTIVE or WAITING session for `key`, if any.
    async fn find_open_by_key(&self, key: &SessionKey) -> Result<Option<Session>, RepositoryError>;

    async fn create_with_welcome(
        &self,
        session: Session,
        welcome: Message,
    ) -> Result<SessionCreation, RepositoryError>;

    async fn record_turn(&self, turn: TurnRecord) -> Result<TurnOutcome, RepositoryError>;

    /// Persists status and escalation fields only.
    async fn save_status(&self, session: &Session) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Up to `limit` messages, newest first.
    async fn recent_for_session(
        &self,
        session_id: &SessionId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError>;

    async fn list_for_session(&self, session_id: &SessionId)
        -> Result<Vec<Message>, RepositoryError>;
}

#[async_trait]
pub trait SupportConfigRepository: Send + Sync {
    async fn find_active(&self, marketplace: &str)
        -> Result<Option<SupportConfig>, RepositoryError>;
    async fn save(&self, config: SupportConfig) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Looks up by internal id first, then by external marketplace order id.
    async fn find_order(&self, id_or_external_id: &str)
        -> Result<Option<OrderSummary>, RepositoryError>;
    async fn save(&self, order: OrderSummary) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn find_product(&self, id: &ProductId) -> Result<Option<ProductSummary>, RepositoryError>;
    async fn save(&self, product: ProductSummary) -> Result<(), RepositoryError>;
}

/// Fixed microsecond precision keeps lexical order equal to time order.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|value| parse_timestamp(column, &value)).transpose()
}

pub(crate) fn decode_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("{column}: {value} is out of range")))
}

pub(crate) fn decode_err(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}
