use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use bazaar_core::domain::message::Message;
use bazaar_core::domain::order::OrderSummary;
use bazaar_core::domain::product::{ProductId, ProductSummary};
use bazaar_core::domain::session::{Session, SessionId, SessionKey, SessionStatus};
use bazaar_core::domain::support_config::SupportConfig;

use super::{
    MessageRepository, OrderRepository, ProductRepository, RepositoryError, SessionCreation,
    SessionRepository, SupportConfigRepository, TurnOutcome, TurnRecord,
};

#[derive(Default)]
struct ConversationState {
    sessions: HashMap<String, Session>,
    messages: HashMap<String, Vec<Message>>,
}

impl ConversationState {
    fn open_session_for_key(&self, key: &SessionKey) -> Option<&Session> {
        self.sessions
            .values()
            .filter(|session| session.session_key == *key && session.status.is_open())
            .max_by_key(|session| session.created_at)
    }
}

/// Sessions and their messages behind one lock, so turn writes are atomic
/// the way the SQL transaction makes them.
#[derive(Default)]
pub struct InMemoryConversationStore {
    state: RwLock<ConversationState>,
}

#[async_trait]
impl SessionRepository for InMemoryConversationStore {
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError> {
        Ok(self.state.read().await.sessions.get(&id.0).cloned())
    }

    async fn find_open_by_key(
        &self,
        key: &SessionKey,
    ) -> Result<Option<Session>, RepositoryError> {
        Ok(self.state.read().await.open_session_for_key(key).cloned())
    }

    async fn create_with_welcome(
        &self,
        session: Session,
        welcome: Message,
    ) -> Result<SessionCreation, RepositoryError> {
        let mut state = self.state.write().await;

        if session.status.is_open() {
            if let Some(existing) = state.open_session_for_key(&session.session_key) {
                return Ok(SessionCreation::Existing(existing.clone()));
            }
        }

        state.messages.entry(session.id.0.clone()).or_default().push(welcome);
        state.sessions.insert(session.id.0.clone(), session.clone());
        Ok(SessionCreation::Created(session))
    }

    async fn record_turn(&self, turn: TurnRecord) -> Result<TurnOutcome, RepositoryError> {
        let mut state = self.state.write().await;
        let ConversationState { sessions, messages } = &mut *state;

        let Some(session) = sessions.get_mut(&turn.session_id.0) else {
            return Err(RepositoryError::Conflict(format!(
                "session `{}` does not exist",
                turn.session_id.0
            )));
        };

        if session.message_count != turn.expected_message_count {
            let stored = messages.get(&turn.session_id.0).map(Vec::as_slice).unwrap_or_default();
            let already_recorded = !turn.messages.is_empty()
                && turn.messages.iter().all(|message| {
                    stored.iter().any(|existing| {
                        existing.sequence == message.sequence
                            && existing.role == message.role
                            && existing.content == message.content
                    })
                });
            if already_recorded {
                return Ok(TurnOutcome::AlreadyRecorded(session.clone()));
            }
            return Err(RepositoryError::Conflict(format!(
                "session `{}` message_count is {} but the turn expected {}",
                session.id.0, session.message_count, turn.expected_message_count
            )));
        }

        session.message_count = turn.next_message_count();
        session.last_message_at = turn.recorded_at;
        session.updated_at = turn.recorded_at;
        if let Some(context) = turn.context {
            session.context = context;
        }
        match turn.escalation {
            Some(mark) => session.escalate(mark.reason, mark.at),
            None if session.status == SessionStatus::Waiting => {
                session.status = SessionStatus::Active;
            }
            None => {}
        }

        messages.entry(turn.session_id.0.clone()).or_default().extend(turn.messages);
        Ok(TurnOutcome::Recorded(session.clone()))
    }

    async fn save_status(&self, session: &Session) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;

        if session.status.is_open() {
            let taken = state.sessions.values().any(|other| {
                other.id != session.id
                    && other.session_key == session.session_key
                    && other.status.is_open()
            });
            if taken {
                return Err(RepositoryError::Conflict(format!(
                    "another open session already uses key `{}`",
                    session.session_key.0
                )));
            }
        }

        let Some(stored) = state.sessions.get_mut(&session.id.0) else {
            return Err(RepositoryError::Conflict(format!(
                "session `{}` does not exist",
                session.id.0
            )));
        };
        stored.status = session.status;
        stored.is_escalated = session.is_escalated;
        stored.escalated_at = session.escalated_at;
        stored.escalation_reason = session.escalation_reason.clone();
        stored.updated_at = session.updated_at;
        Ok(())
    }
}

#[async_trait]
impl MessageRepository for InMemoryConversationStore {
    async fn recent_for_session(
        &self,
        session_id: &SessionId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let mut messages = self.list_for_session(session_id).await?;
        messages.reverse();
        messages.truncate(limit as usize);
        Ok(messages)
    }

    async fn list_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<Message>, RepositoryError> {
        let mut messages =
            self.state.read().await.messages.get(&session_id.0).cloned().unwrap_or_default();
        messages.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then(left.sequence.cmp(&right.sequence))
        });
        Ok(messages)
    }
}

#[derive(Default)]
pub struct InMemorySupportConfigRepository {
    configs: RwLock<HashMap<String, SupportConfig>>,
}

#[async_trait]
impl SupportConfigRepository for InMemorySupportConfigRepository {
    async fn find_active(
        &self,
        marketplace: &str,
    ) -> Result<Option<SupportConfig>, RepositoryError> {
        Ok(self
            .configs
            .read()
            .await
            .get(marketplace)
            .filter(|config| config.is_active)
            .cloned())
    }

    async fn save(&self, config: SupportConfig) -> Result<(), RepositoryError> {
        self.configs.write().await.insert(config.marketplace.clone(), config);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<HashMap<String, OrderSummary>>,
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn find_order(
        &self,
        id_or_external_id: &str,
    ) -> Result<Option<OrderSummary>, RepositoryError> {
        let orders = self.orders.read().await;
        if let Some(order) = orders.get(id_or_external_id) {
            return Ok(Some(order.clone()));
        }
        Ok(orders
            .values()
            .find(|order| order.external_order_id.as_deref() == Some(id_or_external_id))
            .cloned())
    }

    async fn save(&self, order: OrderSummary) -> Result<(), RepositoryError> {
        self.orders.write().await.insert(order.id.0.clone(), order);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryProductRepository {
    products: RwLock<HashMap<String, ProductSummary>>,
}

#[async_trait]
impl ProductRepository for InMemoryProductRepository {
    async fn find_product(&self, id: &ProductId) -> Result<Option<ProductSummary>, RepositoryError> {
        Ok(self.products.read().await.get(&id.0).cloned())
    }

    async fn save(&self, product: ProductSummary) -> Result<(), RepositoryError> {
        self.products.write().await.insert(product.id.0.clone(), product);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use bazaar_core::domain::message::{Message, MessageRole};
    use bazaar_core::domain::order::{OrderId, OrderSummary};
    use bazaar_core::domain::session::{
        Session, SessionContext, SessionId, SessionKey, SessionStatus,
    };

    use super::{InMemoryConversationStore, InMemoryOrderRepository};
    use crate::repositories::{
        MessageRepository, OrderRepository, RepositoryError, SessionCreation, SessionRepository,
        TurnOutcome, TurnRecord,
    };

    fn session(key: &str) -> Session {
        let now = Utc::now();
        Session {
            id: SessionId::generate(),
            session_key: SessionKey(key.to_string()),
            marketplace: "amazon".to_string(),
            customer_id: Some("C-1".to_string()),
            customer_name: None,
            customer_email: None,
            customer_locale: "en".to_string(),
            context: SessionContext::default(),
            status: SessionStatus::Waiting,
            message_count: 0,
            is_escalated: false,
            escalated_at: None,
            escalation_reason: None,
            last_message_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    fn operator_turn(session: &Session, expected: u32) -> TurnRecord {
        let at = Utc::now() + Duration::seconds(1);
        TurnRecord {
            session_id: session.id.clone(),
            expected_message_count: expected,
            messages: vec![Message::new(
                session.id.clone(),
                expected + 1,
                MessageRole::Operator,
                "An agent is looking into this.",
                at,
            )],
            context: None,
            escalation: None,
            recorded_at: at,
        }
    }

    #[tokio::test]
    async fn in_memory_store_allows_one_open_session_per_key() {
        let store = InMemoryConversationStore::default();
        let first = session("amazon_C-1");
        let second = session("amazon_C-1");
        let welcome = |s: &Session| Message::new(s.id.clone(), 0, MessageRole::System, "hi", s.created_at);

        store.create_with_welcome(first.clone(), welcome(&first)).await.expect("first");
        let outcome = store.create_with_welcome(second.clone(), welcome(&second)).await.expect("second");

        assert!(matches!(outcome, SessionCreation::Existing(ref existing) if existing.id == first.id));
        assert!(store.find_by_id(&second.id).await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn in_memory_operator_turn_increments_by_one_and_activates_waiting_session() {
        let store = InMemoryConversationStore::default();
        let session = session("amazon_C-2");
        let welcome =
            Message::new(session.id.clone(), 0, MessageRole::System, "hi", session.created_at);
        store.create_with_welcome(session.clone(), welcome).await.expect("create");

        let outcome = store.record_turn(operator_turn(&session, 0)).await.expect("record");
        assert!(matches!(outcome, TurnOutcome::Recorded(_)));
        assert_eq!(outcome.session().message_count, 1);
        assert_eq!(outcome.session().status, SessionStatus::Active);

        let replay = store.record_turn(operator_turn(&session, 0)).await.expect("replay");
        assert!(matches!(replay, TurnOutcome::AlreadyRecorded(_)));

        let recent = store.recent_for_session(&session.id, 1).await.expect("recent");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].role, MessageRole::Operator);
    }

    #[tokio::test]
    async fn in_memory_stale_turn_is_a_conflict() {
        let store = InMemoryConversationStore::default();
        let session = session("amazon_C-3");
        let welcome =
            Message::new(session.id.clone(), 0, MessageRole::System, "hi", session.created_at);
        store.create_with_welcome(session.clone(), welcome).await.expect("create");

        let mut stale = operator_turn(&session, 4);
        stale.messages[0].sequence = 5;
        let error = store.record_turn(stale).await.expect_err("stale");
        assert!(matches!(error, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn in_memory_different_turn_at_taken_sequence_is_a_conflict() {
        let store = InMemoryConversationStore::default();
        let session = session("amazon_C-4");
        let welcome =
            Message::new(session.id.clone(), 0, MessageRole::System, "hi", session.created_at);
        store.create_with_welcome(session.clone(), welcome).await.expect("create");
        store.record_turn(operator_turn(&session, 0)).await.expect("first writer");

        let mut competing = operator_turn(&session, 0);
        competing.messages[0].content = "A different agent reply.".to_string();
        let error = store.record_turn(competing).await.expect_err("competing writer");
        assert!(matches!(error, RepositoryError::Conflict(_)));

        let history = store.list_for_session(&session.id).await.expect("history");
        let contents: Vec<&str> = history.iter().map(|message| message.content.as_str()).collect();
        assert_eq!(contents, ["hi", "An agent is looking into this."]);
    }

    #[tokio::test]
    async fn in_memory_order_lookup_falls_back_to_external_id() {
        let repo = InMemoryOrderRepository::default();
        repo.save(OrderSummary {
            id: OrderId("ord_1".to_string()),
            external_order_id: Some("99210".to_string()),
            marketplace: "amazon".to_string(),
            status: "processing".to_string(),
            payment_status: None,
            fulfillment_status: None,
            total: Decimal::ZERO,
            currency: "USD".to_string(),
            tracking_number: None,
            carrier: None,
            shipped_at: None,
            delivered_at: None,
            estimated_delivery: None,
            items: Vec::new(),
        })
        .await
        .expect("save");

        let found = repo.find_order("99210").await.expect("find").expect("order");
        assert_eq!(found.id, OrderId("ord_1".to_string()));
    }
}
