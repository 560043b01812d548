//! Conversation API.
//!
//! - `POST /v1/sessions`                          get-or-create a support session
//! - `POST /v1/sessions/{id}/messages`            run one automated turn
//! - `POST /v1/sessions/{id}/operator-messages`   append a human operator reply
//! - `POST /v1/sessions/{id}/resolve`             mark resolved
//! - `POST /v1/sessions/{id}/close`               close for good
//! - `POST /v1/sessions/{id}/reactivate`          reopen an escalated or resolved session

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use bazaar_agent::session::NewSession;
use bazaar_agent::{AgentRuntime, TurnResult};
use bazaar_core::domain::session::{
    Session, SessionContext, SessionId, SessionStatus, CONTEXT_PRODUCT_ID,
};
use bazaar_core::errors::{ApplicationError, InterfaceError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ConversationState {
    runtime: AgentRuntime,
}

impl ConversationState {
    pub fn new(runtime: AgentRuntime) -> Self {
        Self { runtime }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenSessionRequest {
    pub marketplace: String,
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub locale: Option<String>,
    pub product_id: Option<String>,
    #[serde(default)]
    pub context: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
pub struct CustomerMessageRequest {
    pub text: String,
    pub locale: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OperatorMessageRequest {
    pub text: String,
    pub operator: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: String,
    pub marketplace: String,
    pub customer_id: Option<String>,
    pub customer_locale: String,
    pub status: SessionStatus,
    pub message_count: u32,
    pub is_escalated: bool,
    pub escalation_reason: Option<String>,
    pub context: SessionContext,
    pub last_message_at: DateTime<Utc>,
}

impl From<Session> for SessionView {
    fn from(session: Session) -> Self {
        Self {
            id: session.id.0,
            marketplace: session.marketplace,
            customer_id: session.customer_id,
            customer_locale: session.customer_locale,
            status: session.status,
            message_count: session.message_count,
            is_escalated: session.is_escalated,
            escalation_reason: session.escalation_reason,
            context: session.context,
            last_message_at: session.last_message_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorMessageResponse {
    pub session: SessionView,
    pub message_id: String,
    pub sequence: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub error: String,
    pub correlation_id: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

pub fn router(runtime: AgentRuntime) -> Router {
    Router::new()
        .route("/v1/sessions", post(open_session))
        .route("/v1/sessions/{id}/messages", post(post_customer_message))
        .route("/v1/sessions/{id}/operator-messages", post(post_operator_message))
        .route("/v1/sessions/{id}/resolve", post(resolve_session))
        .route("/v1/sessions/{id}/close", post(close_session))
        .route("/v1/sessions/{id}/reactivate", post(reactivate_session))
        .with_state(ConversationState::new(runtime))
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn api_error(error: ApplicationError, correlation_id: &str) -> (StatusCode, Json<ApiError>) {
    let detail = error.to_string();
    let mapped = error.into_interface(correlation_id);
    let status = match mapped {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(
        event_name = "api.request_failed",
        correlation_id = %correlation_id,
        status = status.as_u16(),
        error = %detail,
        "conversation request failed"
    );
    (
        status,
        Json(ApiError {
            error: mapped.user_message().to_string(),
            correlation_id: mapped.correlation_id().to_string(),
        }),
    )
}

fn bad_request(message: &str, correlation_id: &str) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiError { error: message.to_string(), correlation_id: correlation_id.to_string() }),
    )
}

async fn open_session(
    State(state): State<ConversationState>,
    headers: HeaderMap,
    Json(body): Json<OpenSessionRequest>,
) -> ApiResult<SessionView> {
    let correlation_id = correlation_id(&headers);
    if body.marketplace.trim().is_empty() {
        return Err(bad_request("marketplace is required", &correlation_id));
    }

    let mut context = SessionContext(body.context.unwrap_or_default());
    if let Some(product_id) = body.product_id.filter(|id| !id.trim().is_empty()) {
        context.insert(CONTEXT_PRODUCT_ID, Value::String(product_id));
    }

    let session = state
        .runtime
        .open_session(NewSession {
            marketplace: body.marketplace,
            customer_id: body.customer_id,
            customer_name: body.customer_name,
            customer_email: body.customer_email,
            locale: body.locale,
            context: Some(context),
        })
        .await
        .map_err(|error| api_error(error, &correlation_id))?;

    info!(
        event_name = "api.session.opened",
        correlation_id = %correlation_id,
        session_id = %session.id.0,
        "session ready"
    );
    Ok(Json(session.into()))
}

async fn post_customer_message(
    Path(id): Path<String>,
    State(state): State<ConversationState>,
    headers: HeaderMap,
    Json(body): Json<CustomerMessageRequest>,
) -> ApiResult<TurnResult> {
    let correlation_id = correlation_id(&headers);
    if body.text.trim().is_empty() {
        return Err(bad_request("text is required", &correlation_id));
    }

    let result = state
        .runtime
        .process_message(SessionId(id), body.text, body.locale, correlation_id.clone())
        .await
        .map_err(|error| api_error(error, &correlation_id))?;
    Ok(Json(result))
}

async fn post_operator_message(
    Path(id): Path<String>,
    State(state): State<ConversationState>,
    headers: HeaderMap,
    Json(body): Json<OperatorMessageRequest>,
) -> ApiResult<OperatorMessageResponse> {
    let correlation_id = correlation_id(&headers);
    if body.text.trim().is_empty() || body.operator.trim().is_empty() {
        return Err(bad_request("text and operator are required", &correlation_id));
    }

    let (session, message) = state
        .runtime
        .post_operator_message(SessionId(id), &body.text, body.operator.trim(), &correlation_id)
        .await
        .map_err(|error| api_error(error, &correlation_id))?;

    Ok(Json(OperatorMessageResponse {
        session: session.into(),
        message_id: message.id.0,
        sequence: message.sequence,
    }))
}

async fn resolve_session(
    Path(id): Path<String>,
    State(state): State<ConversationState>,
    headers: HeaderMap,
) -> ApiResult<SessionView> {
    let correlation_id = correlation_id(&headers);
    let session =
        state.runtime.resolve(SessionId(id)).await.map_err(|error| api_error(error, &correlation_id))?;
    Ok(Json(session.into()))
}

async fn close_session(
    Path(id): Path<String>,
    State(state): State<ConversationState>,
    headers: HeaderMap,
) -> ApiResult<SessionView> {
    let correlation_id = correlation_id(&headers);
    let session =
        state.runtime.close(SessionId(id)).await.map_err(|error| api_error(error, &correlation_id))?;
    Ok(Json(session.into()))
}

async fn reactivate_session(
    Path(id): Path<String>,
    State(state): State<ConversationState>,
    headers: HeaderMap,
) -> ApiResult<SessionView> {
    let correlation_id = correlation_id(&headers);
    let session = state
        .runtime
        .reactivate(SessionId(id))
        .await
        .map_err(|error| api_error(error, &correlation_id))?;
    Ok(Json(session.into()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        extract::{Path, State},
        http::{HeaderMap, HeaderValue, Request, StatusCode},
        Json,
    };
    use bazaar_agent::classifier::IntentClassifier;
    use bazaar_agent::llm::ScriptedLlmClient;
    use bazaar_agent::{AgentRuntime, RuntimeDeps, RuntimeSettings, TurnStatus};
    use bazaar_core::audit::NoopAuditSink;
    use bazaar_core::domain::session::SessionStatus;
    use bazaar_db::repositories::{
        InMemoryConversationStore, InMemoryOrderRepository, InMemoryProductRepository,
        InMemorySupportConfigRepository,
    };
    use tower::ServiceExt;

    use super::{
        close_session, open_session, post_customer_message, post_operator_message,
        reactivate_session, router, ConversationState, CustomerMessageRequest,
        OpenSessionRequest, OperatorMessageRequest, CORRELATION_HEADER,
    };

    fn runtime() -> AgentRuntime {
        let store = Arc::new(InMemoryConversationStore::default());
        AgentRuntime::new(
            RuntimeDeps {
                sessions: store.clone(),
                messages: store,
                configs: Arc::new(InMemorySupportConfigRepository::default()),
                orders: Arc::new(InMemoryOrderRepository::default()),
                products: Arc::new(InMemoryProductRepository::default()),
                llm: Arc::new(ScriptedLlmClient::replying("Happy to help!")),
                audit: Arc::new(NoopAuditSink),
            },
            RuntimeSettings::default(),
            IntentClassifier::with_default_rules().expect("default rules"),
        )
    }

    fn open_request(customer: &str) -> OpenSessionRequest {
        OpenSessionRequest {
            marketplace: "amazon".to_string(),
            customer_id: Some(customer.to_string()),
            customer_name: None,
            customer_email: None,
            locale: Some("en".to_string()),
            product_id: Some("prod_7".to_string()),
            context: None,
        }
    }

    #[tokio::test]
    async fn open_session_seeds_product_and_reuses_open_session() {
        let state = ConversationState::new(runtime());

        let Json(first) = open_session(State(state.clone()), HeaderMap::new(), Json(open_request("C-1")))
            .await
            .expect("open");
        let Json(second) = open_session(State(state), HeaderMap::new(), Json(open_request("C-1")))
            .await
            .expect("reuse");

        assert_eq!(first.id, second.id);
        assert_eq!(first.status, SessionStatus::Active);
        assert_eq!(first.context.product_id(), Some("prod_7"));
    }

    #[tokio::test]
    async fn customer_message_returns_turn_result() {
        let state = ConversationState::new(runtime());
        let Json(session) = open_session(State(state.clone()), HeaderMap::new(), Json(open_request("C-2")))
            .await
            .expect("open");

        let Json(result) = post_customer_message(
            Path(session.id.clone()),
            State(state),
            HeaderMap::new(),
            Json(CustomerMessageRequest { text: "hello there".to_string(), locale: None }),
        )
        .await
        .expect("turn");

        assert_eq!(result.status, TurnStatus::Replied);
        assert_eq!(result.message, "Happy to help!");
        assert_eq!(result.referenced_product_id.as_deref(), Some("prod_7"));
    }

    #[tokio::test]
    async fn blank_customer_message_is_rejected() {
        let state = ConversationState::new(runtime());
        let mut headers = HeaderMap::new();
        headers.insert(CORRELATION_HEADER, HeaderValue::from_static("req-blank"));

        let (status, Json(error)) = post_customer_message(
            Path("S-1".to_string()),
            State(state),
            headers,
            Json(CustomerMessageRequest { text: "  ".to_string(), locale: None }),
        )
        .await
        .expect_err("blank text");

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error.correlation_id, "req-blank");
    }

    #[tokio::test]
    async fn operator_message_on_missing_session_is_not_found() {
        let state = ConversationState::new(runtime());
        let (status, _) = post_operator_message(
            Path("missing".to_string()),
            State(state),
            HeaderMap::new(),
            Json(OperatorMessageRequest { text: "hi".to_string(), operator: "dana".to_string() }),
        )
        .await
        .expect_err("missing session");
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn closed_session_cannot_be_reactivated() {
        let state = ConversationState::new(runtime());
        let Json(session) = open_session(State(state.clone()), HeaderMap::new(), Json(open_request("C-3")))
            .await
            .expect("open");

        let Json(closed) = close_session(Path(session.id.clone()), State(state.clone()), HeaderMap::new())
            .await
            .expect("close");
        assert_eq!(closed.status, SessionStatus::Closed);

        let (status, _) = reactivate_session(Path(session.id), State(state), HeaderMap::new())
            .await
            .expect_err("closed is final");
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn router_serves_session_creation() {
        let response = router(runtime())
            .oneshot(
                Request::post("/v1/sessions")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"marketplace":"ebay","customerId":"C-9"}"#))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
    }
}
