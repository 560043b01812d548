use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use bazaar_core::domain::message::{Message, MessageRole};
use bazaar_core::domain::session::{
    Session, SessionContext, SessionId, SessionKey, SessionStatus,
};
use bazaar_core::domain::support_config::primary_language;
use bazaar_core::errors::{ApplicationError, DomainError};
use bazaar_db::repositories::{
    EscalationMark, RepositoryError, SessionCreation, SessionRepository, TurnOutcome, TurnRecord,
};

pub const DEFAULT_LOCALE: &str = "en";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NewSession {
    pub marketplace: String,
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub locale: Option<String>,
    /// Seed facts, e.g. the `productId` a conversation was started from.
    pub context: Option<SessionContext>,
}

/// One automated exchange: the customer message and the reply to it.
pub struct AutomatedTurn<'a> {
    pub session: &'a Session,
    pub user_message: Message,
    pub assistant_message: Message,
    pub context: SessionContext,
    pub escalation: Option<EscalationMark>,
    pub recorded_at: DateTime<Utc>,
}

pub fn welcome_message(locale: &str) -> &'static str {
    match primary_language(locale).as_str() {
        "es" => "¡Hola! Gracias por contactarnos. ¿En qué podemos ayudarte hoy?",
        "de" => "Hallo! Danke, dass Sie uns kontaktieren. Wie können wir Ihnen heute helfen?",
        "fr" => "Bonjour ! Merci de nous avoir contactés. Comment pouvons-nous vous aider aujourd'hui ?",
        "it" => "Ciao! Grazie per averci contattato. Come possiamo aiutarti oggi?",
        _ => "Hello! Thanks for reaching out. How can we help you today?",
    }
}

pub(crate) fn persistence_error(error: RepositoryError) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}

/// Session lifecycle and message bookkeeping on top of [`SessionRepository`].
pub struct SessionManager {
    sessions: Arc<dyn SessionRepository>,
}

impl SessionManager {
    pub fn new(sessions: Arc<dyn SessionRepository>) -> Self {
        Self { sessions }
    }

    pub async fn find(&self, id: &SessionId) -> Result<Option<Session>, ApplicationError> {
        self.sessions.find_by_id(id).await.map_err(persistence_error)
    }

    async fn require(&self, id: &SessionId) -> Result<Session, ApplicationError> {
        self.find(id).await?.ok_or_else(|| ApplicationError::NotFound(format!("session `{}`", id.0)))
    }

    /// Reuses the open session for the marketplace/customer pair or opens a
    /// new one with a welcome message.
    pub async fn get_or_create(&self, request: NewSession) -> Result<Session, ApplicationError> {
        let marketplace = request.marketplace.trim();
        if marketplace.is_empty() {
            return Err(DomainError::InvariantViolation("marketplace is required".to_string()).into());
        }

        let now = Utc::now();
        let key = SessionKey::derive(marketplace, request.customer_id.as_deref(), now);
        if let Some(existing) = self.sessions.find_open_by_key(&key).await.map_err(persistence_error)? {
            return Ok(existing);
        }

        let locale = request
            .locale
            .as_deref()
            .map(str::trim)
            .filter(|locale| !locale.is_empty())
            .unwrap_or(DEFAULT_LOCALE)
            .to_string();
        let session = Session {
            id: SessionId::generate(),
            session_key: key,
            marketplace: marketplace.to_string(),
            customer_id: request.customer_id.filter(|id| !id.trim().is_empty()),
            customer_name: request.customer_name,
            customer_email: request.customer_email,
            customer_locale: locale.clone(),
            context: request.context.unwrap_or_default(),
            status: SessionStatus::Active,
            message_count: 0,
            is_escalated: false,
            escalated_at: None,
            escalation_reason: None,
            last_message_at: now,
            created_at: now,
            updated_at: now,
        };
        let welcome =
            Message::new(session.id.clone(), 0, MessageRole::System, welcome_message(&locale), now)
                .auto_reply();

        match self.sessions.create_with_welcome(session, welcome).await.map_err(persistence_error)? {
            SessionCreation::Created(session) => {
                info!(
                    event_name = "session.created",
                    session_id = %session.id.0,
                    marketplace = %session.marketplace,
                    "opened support session"
                );
                Ok(session)
            }
            SessionCreation::Existing(session) => Ok(session),
        }
    }

    /// Persists USER then ASSISTANT in one write and returns the updated session.
    pub async fn record_turn(&self, turn: AutomatedTurn<'_>) -> Result<Session, ApplicationError> {
        let record = TurnRecord {
            session_id: turn.session.id.clone(),
            expected_message_count: turn.session.message_count,
            messages: vec![turn.user_message, turn.assistant_message],
            context: Some(turn.context),
            escalation: turn.escalation,
            recorded_at: turn.recorded_at,
        };
        self.write(record).await
    }

    pub async fn record_operator_message(
        &self,
        session_id: &SessionId,
        content: &str,
    ) -> Result<(Session, Message), ApplicationError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(DomainError::InvariantViolation("operator message is empty".to_string()).into());
        }

        let session = self.require(session_id).await?;
        if session.status == SessionStatus::Closed {
            return Err(DomainError::InvariantViolation(format!(
                "session `{}` is closed",
                session.id.0
            ))
            .into());
        }

        let now = Utc::now();
        let message = Message::new(
            session.id.clone(),
            session.message_count + 1,
            MessageRole::Operator,
            content,
            now,
        );
        let record = TurnRecord {
            session_id: session.id.clone(),
            expected_message_count: session.message_count,
            messages: vec![message.clone()],
            context: None,
            escalation: None,
            recorded_at: now,
        };
        let session = self.write(record).await?;
        Ok((session, message))
    }

    pub async fn resolve(&self, id: &SessionId) -> Result<Session, ApplicationError> {
        self.transition(id, SessionStatus::Resolved).await
    }

    pub async fn close(&self, id: &SessionId) -> Result<Session, ApplicationError> {
        self.transition(id, SessionStatus::Closed).await
    }

    pub async fn reactivate(&self, id: &SessionId) -> Result<Session, ApplicationError> {
        self.transition(id, SessionStatus::Active).await
    }

    async fn transition(
        &self,
        id: &SessionId,
        next: SessionStatus,
    ) -> Result<Session, ApplicationError> {
        let mut session = self.require(id).await?;
        let previous = session.status;
        session.transition_to(next)?;
        session.updated_at = Utc::now();
        self.sessions.save_status(&session).await.map_err(persistence_error)?;

        info!(
            event_name = "session.status_changed",
            session_id = %session.id.0,
            from = previous.as_str(),
            to = next.as_str(),
            "session status changed"
        );
        Ok(session)
    }

    async fn write(&self, record: TurnRecord) -> Result<Session, ApplicationError> {
        let session_id = record.session_id.0.clone();
        match self.sessions.record_turn(record).await.map_err(persistence_error)? {
            TurnOutcome::Recorded(session) => Ok(session),
            TurnOutcome::AlreadyRecorded(session) => {
                warn!(
                    event_name = "session.turn_replayed",
                    session_id = %session_id,
                    "turn was already recorded; returning stored session"
                );
                Ok(session)
            }
        }
    }
}
