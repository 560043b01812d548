use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};

use bazaar_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use bazaar_core::config::AppConfig;
use bazaar_core::domain::intent::{Entities, Intent};
use bazaar_core::domain::message::{Message, MessageRole};
use bazaar_core::domain::session::{
    Session, SessionContext, SessionId, SessionStatus, CONTEXT_ORDER_INFO,
};
use bazaar_core::errors::{ApplicationError, DomainError};
use bazaar_db::repositories::{
    EscalationMark, MessageRepository, OrderRepository, ProductRepository, SessionRepository,
    SqlMessageRepository, SqlOrderRepository, SqlProductRepository, SqlSessionRepository,
    SqlSupportConfigRepository, SupportConfigRepository,
};
use bazaar_db::DbPool;

use crate::classifier::IntentClassifier;
use crate::config_store::ConfigStore;
use crate::enrichment::ContextEnricher;
use crate::escalation::{EscalationInput, EscalationPolicy};
use crate::llm::LlmClient;
use crate::responder::{GenerationOutcome, GenerationRequest, ResponseGenerator};
use crate::session::{AutomatedTurn, NewSession, SessionManager};
use crate::suggestions::{suggested_actions, SuggestionInput};

pub const SESSION_NOT_FOUND_MESSAGE: &str = "Session not found.";
pub const SESSION_INACTIVE_MESSAGE: &str = "This conversation has been closed. \
Please start a new conversation if you need more help.";

/// Collaborators the runtime is assembled from.
#[derive(Clone)]
pub struct RuntimeDeps {
    pub sessions: Arc<dyn SessionRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub configs: Arc<dyn SupportConfigRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub products: Arc<dyn ProductRepository>,
    pub llm: Arc<dyn LlmClient>,
    pub audit: Arc<dyn AuditSink>,
}

impl RuntimeDeps {
    pub fn from_pool(pool: DbPool, llm: Arc<dyn LlmClient>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            sessions: Arc::new(SqlSessionRepository::new(pool.clone())),
            messages: Arc::new(SqlMessageRepository::new(pool.clone())),
            configs: Arc::new(SqlSupportConfigRepository::new(pool.clone())),
            orders: Arc::new(SqlOrderRepository::new(pool.clone())),
            products: Arc::new(SqlProductRepository::new(pool)),
            llm,
            audit,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub history_limit: u32,
    pub llm_timeout: Duration,
    pub config_cache_ttl: Duration,
    pub default_model: String,
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            history_limit: config.support.history_limit,
            llm_timeout: Duration::from_secs(config.llm.timeout_secs),
            config_cache_ttl: Duration::from_secs(config.support.config_cache_ttl_secs),
            default_model: config.llm.model.clone(),
        }
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Replied,
    SessionNotFound,
    SessionInactive,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TurnResult {
    pub status: TurnStatus,
    pub session_id: String,
    pub message: String,
    pub intent: Intent,
    pub confidence: f64,
    pub suggested_actions: Vec<String>,
    pub should_escalate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referenced_order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referenced_product_id: Option<String>,
}

impl TurnResult {
    fn refused(status: TurnStatus, session_id: &SessionId, message: &str) -> Self {
        Self {
            status,
            session_id: session_id.0.clone(),
            message: message.to_string(),
            intent: Intent::Unknown,
            confidence: 0.0,
            suggested_actions: Vec::new(),
            should_escalate: false,
            escalation_reason: None,
            referenced_order_id: None,
            referenced_product_id: None,
        }
    }
}

/// Hands out one async mutex per session id. Entries are weak so a session's
/// lock disappears once no turn holds or waits on it.
#[derive(Default)]
struct SessionLocks {
    locks: Mutex<HashMap<String, Weak<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    async fn acquire(&self, session_id: &SessionId) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = match self.locks.lock() {
                Ok(locks) => locks,
                Err(poisoned) => poisoned.into_inner(),
            };
            locks.retain(|_, entry| entry.strong_count() > 0);
            match locks.get(&session_id.0).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(tokio::sync::Mutex::new(()));
                    locks.insert(session_id.0.clone(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        match self.locks.lock() {
            Ok(locks) => locks.values().filter(|entry| entry.strong_count() > 0).count(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

struct Inner {
    classifier: IntentClassifier,
    enricher: ContextEnricher,
    policy: EscalationPolicy,
    generator: ResponseGenerator,
    sessions: SessionManager,
    configs: ConfigStore,
    audit: Arc<dyn AuditSink>,
}

/// Runs the support pipeline for inbound customer messages.
#[derive(Clone)]
pub struct AgentRuntime {
    inner: Arc<Inner>,
    locks: Arc<SessionLocks>,
}

impl AgentRuntime {
    pub fn new(deps: RuntimeDeps, settings: RuntimeSettings, classifier: IntentClassifier) -> Self {
        let inner = Inner {
            classifier,
            enricher: ContextEnricher::new(deps.orders, deps.products),
            policy: EscalationPolicy,
            generator: ResponseGenerator::new(
                deps.messages,
                deps.llm,
                settings.history_limit,
                settings.llm_timeout,
            ),
            sessions: SessionManager::new(deps.sessions),
            configs: ConfigStore::new(deps.configs, settings.config_cache_ttl)
                .with_default_model(settings.default_model),
            audit: deps.audit,
        };
        Self { inner: Arc::new(inner), locks: Arc::new(SessionLocks::default()) }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.inner.sessions
    }

    pub async fn open_session(&self, request: NewSession) -> Result<Session, ApplicationError> {
        self.inner.sessions.get_or_create(request).await
    }

    /// Runs one automated turn. The pipeline runs on its own task, so
    /// dropping the returned future does not abandon a half-written turn.
    pub async fn process_message(
        &self,
        session_id: SessionId,
        text: impl Into<String>,
        locale: Option<String>,
        correlation_id: impl Into<String>,
    ) -> Result<TurnResult, ApplicationError> {
        let inner = Arc::clone(&self.inner);
        let locks = Arc::clone(&self.locks);
        let text = text.into();
        let correlation_id = correlation_id.into();

        let task = tokio::spawn(async move {
            let _guard = locks.acquire(&session_id).await;
            inner.run_turn(session_id, text, locale, correlation_id).await
        });
        task.await.map_err(|error| ApplicationError::Integration(format!("turn task failed: {error}")))?
    }

    pub async fn post_operator_message(
        &self,
        session_id: SessionId,
        text: &str,
        operator: &str,
        correlation_id: &str,
    ) -> Result<(Session, Message), ApplicationError> {
        let _guard = self.locks.acquire(&session_id).await;
        let (session, message) =
            self.inner.sessions.record_operator_message(&session_id, text).await?;

        self.inner.audit.emit(
            AuditEvent::new(
                Some(session.id.clone()),
                correlation_id,
                "conversation.operator_message",
                AuditCategory::Operator,
                operator,
                AuditOutcome::Success,
            )
            .with_metadata("sequence", message.sequence.to_string()),
        );
        Ok((session, message))
    }

    pub async fn resolve(&self, session_id: SessionId) -> Result<Session, ApplicationError> {
        let _guard = self.locks.acquire(&session_id).await;
        self.inner.sessions.resolve(&session_id).await
    }

    pub async fn close(&self, session_id: SessionId) -> Result<Session, ApplicationError> {
        let _guard = self.locks.acquire(&session_id).await;
        self.inner.sessions.close(&session_id).await
    }

    pub async fn reactivate(&self, session_id: SessionId) -> Result<Session, ApplicationError> {
        let _guard = self.locks.acquire(&session_id).await;
        self.inner.sessions.reactivate(&session_id).await
    }
}

impl Inner {
    async fn run_turn(
        &self,
        session_id: SessionId,
        text: String,
        locale: Option<String>,
        correlation_id: String,
    ) -> Result<TurnResult, ApplicationError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(DomainError::InvariantViolation("message text is empty".to_string()).into());
        }

        let Some(session) = self.sessions.find(&session_id).await? else {
            info!(
                event_name = "conversation.session_not_found",
                correlation_id = %correlation_id,
                session_id = %session_id.0,
                "inbound message for unknown session"
            );
            return Ok(TurnResult::refused(
                TurnStatus::SessionNotFound,
                &session_id,
                SESSION_NOT_FOUND_MESSAGE,
            ));
        };
        if session.status.is_terminal() {
            info!(
                event_name = "conversation.session_inactive",
                correlation_id = %correlation_id,
                session_id = %session_id.0,
                status = session.status.as_str(),
                "inbound message for inactive session"
            );
            return Ok(TurnResult::refused(
                TurnStatus::SessionInactive,
                &session_id,
                SESSION_INACTIVE_MESSAGE,
            ));
        }

        let classification = self.classifier.classify(text);
        let entities = classification.entities.clone();

        let context = if ContextEnricher::has_references(&session, &entities) {
            session.context.merged(self.enricher.enrich(&session, &entities).await)
        } else {
            session.context.clone()
        };

        let config = self.configs.get_active_config(&session.marketplace).await;
        let decision = self.policy.decide(EscalationInput {
            intent: classification.intent,
            message: text,
            message_count: session.message_count,
            config: &config,
        });

        let locale = locale
            .as_deref()
            .map(str::trim)
            .filter(|locale| !locale.is_empty())
            .unwrap_or(session.customer_locale.as_str())
            .to_string();
        let reply = self
            .generator
            .generate(GenerationRequest {
                session: &session,
                context: &context,
                user_text: text,
                locale: &locale,
                config: &config,
                correlation_id: &correlation_id,
            })
            .await;

        if let GenerationOutcome::Fallback { error_kind, detail } = &reply.outcome {
            self.audit.emit(
                AuditEvent::new(
                    Some(session.id.clone()),
                    &correlation_id,
                    "conversation.generation_fallback",
                    AuditCategory::Generation,
                    "response-generator",
                    AuditOutcome::Degraded,
                )
                .with_metadata("error_kind", *error_kind)
                .with_metadata("error", detail.clone())
                .with_metadata("model", config.model.clone()),
            );
        }

        let referenced_order_id = context.order_id().map(str::to_string);
        let referenced_product_id = context.product_id().map(str::to_string);
        let now = Utc::now();

        let user_message = Message::new(
            session.id.clone(),
            session.message_count + 1,
            MessageRole::User,
            text,
            now,
        )
        .with_classification(classification.intent, classification.confidence, entities.clone())
        .with_references(
            referenced_order_id.clone().or_else(|| entities.order_id.clone()),
            referenced_product_id.clone(),
        );
        let assistant_message = Message::new(
            session.id.clone(),
            session.message_count + 2,
            MessageRole::Assistant,
            reply.text.clone(),
            now,
        )
        .with_references(referenced_order_id.clone(), referenced_product_id.clone())
        .auto_reply();

        let newly_escalated =
            decision.reason().filter(|_| session.status != SessionStatus::Escalated);
        let escalation = newly_escalated
            .map(|reason| EscalationMark { reason: reason.message().to_string(), at: now });

        let updated = match self
            .sessions
            .record_turn(AutomatedTurn {
                session: &session,
                user_message,
                assistant_message,
                context: context.clone(),
                escalation,
                recorded_at: now,
            })
            .await
        {
            Ok(updated) => updated,
            Err(persist_error) => {
                error!(
                    event_name = "conversation.turn_persist_failed",
                    correlation_id = %correlation_id,
                    session_id = %session.id.0,
                    error = %persist_error,
                    "could not record turn"
                );
                self.audit.emit(
                    AuditEvent::new(
                        Some(session.id.clone()),
                        &correlation_id,
                        "conversation.turn_persist_failed",
                        AuditCategory::Persistence,
                        "session-manager",
                        AuditOutcome::Failed,
                    )
                    .with_metadata("error", persist_error.to_string())
                    .with_metadata("expected_message_count", session.message_count.to_string()),
                );
                return Err(persist_error);
            }
        };

        if let Some(reason) = newly_escalated {
            self.audit.emit(
                AuditEvent::new(
                    Some(session.id.clone()),
                    &correlation_id,
                    "conversation.escalated",
                    AuditCategory::Escalation,
                    "escalation-policy",
                    AuditOutcome::Success,
                )
                .with_metadata("reason", reason.message())
                .with_metadata("reason_code", reason.reason_code())
                .with_metadata("intent", classification.intent.as_str()),
            );
        }

        let actions = suggested_actions(SuggestionInput {
            intent: classification.intent,
            order_resolved: context.get(CONTEXT_ORDER_INFO).is_some(),
            has_tracking: has_tracking(&entities, &context),
            escalated: decision.should_escalate() || updated.status == SessionStatus::Escalated,
        });

        info!(
            event_name = "conversation.turn.completed",
            correlation_id = %correlation_id,
            session_id = %updated.id.0,
            intent = classification.intent.as_str(),
            confidence = classification.confidence,
            should_escalate = decision.should_escalate(),
            message_count = updated.message_count,
            "turn completed"
        );

        Ok(TurnResult {
            status: TurnStatus::Replied,
            session_id: updated.id.0.clone(),
            message: reply.text,
            intent: classification.intent,
            confidence: classification.confidence,
            suggested_actions: actions.iter().map(|action| action.label().to_string()).collect(),
            should_escalate: decision.should_escalate(),
            escalation_reason: decision.reason().map(|reason| reason.message().to_string()),
            referenced_order_id,
            referenced_product_id,
        })
    }
}

fn has_tracking(entities: &Entities, context: &SessionContext) -> bool {
    entities.tracking_number.is_some()
        || context
            .get(CONTEXT_ORDER_INFO)
            .and_then(|info| info.get("trackingNumber"))
            .and_then(|value| value.as_str())
            .is_some_and(|value| !value.is_empty())
}
