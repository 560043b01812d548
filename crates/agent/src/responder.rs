use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use bazaar_core::config::MAX_HISTORY_LIMIT;
use bazaar_core::domain::message::{Message, MessageRole};
use bazaar_core::domain::session::{
    Session, SessionContext, CONTEXT_ORDER_INFO, CONTEXT_PRODUCT_INFO,
};
use bazaar_core::domain::support_config::{primary_language, SupportConfig};
use bazaar_db::repositories::MessageRepository;

use crate::llm::{ChatMessage, ChatRole, CompletionRequest, LlmClient, LlmError};

pub const EMPTY_REPLY_MESSAGE: &str =
    "I'm sorry, I could not generate a response. Please try rephrasing your question.";
pub const FALLBACK_REPLY_MESSAGE: &str = "I'm sorry, I'm having trouble answering right now. \
A member of our support team will follow up with you as soon as possible.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GenerationOutcome {
    Model,
    Empty,
    Fallback { error_kind: &'static str, detail: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedReply {
    pub text: String,
    pub outcome: GenerationOutcome,
}

impl GeneratedReply {
    pub fn is_fallback(&self) -> bool {
        matches!(self.outcome, GenerationOutcome::Fallback { .. })
    }
}

pub struct GenerationRequest<'a> {
    pub session: &'a Session,
    /// Context after this turn's enrichment has been merged.
    pub context: &'a SessionContext,
    pub user_text: &'a str,
    pub locale: &'a str,
    pub config: &'a SupportConfig,
    pub correlation_id: &'a str,
}

/// Builds the model prompt for a turn and always produces reply text.
pub struct ResponseGenerator {
    messages: Arc<dyn MessageRepository>,
    llm: Arc<dyn LlmClient>,
    history_limit: u32,
    timeout: Duration,
}

impl ResponseGenerator {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        llm: Arc<dyn LlmClient>,
        history_limit: u32,
        timeout: Duration,
    ) -> Self {
        Self { messages, llm, history_limit: history_limit.clamp(1, MAX_HISTORY_LIMIT), timeout }
    }

    pub async fn generate(&self, request: GenerationRequest<'_>) -> GeneratedReply {
        let history = match self
            .messages
            .recent_for_session(&request.session.id, self.history_limit)
            .await
        {
            Ok(mut recent) => {
                recent.reverse();
                recent
            }
            Err(error) => {
                warn!(
                    event_name = "conversation.history_unavailable",
                    correlation_id = request.correlation_id,
                    session_id = %request.session.id.0,
                    error = %error,
                    "could not load history; generating without it"
                );
                Vec::new()
            }
        };

        let completion = CompletionRequest {
            model: request.config.model.clone(),
            messages: build_prompt(&request, &history),
            temperature: request.config.temperature,
            max_tokens: request.config.max_tokens,
        };

        let result = match tokio::time::timeout(self.timeout, self.llm.complete(completion)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(self.timeout)),
        };

        match result {
            Ok(Some(text)) if !text.trim().is_empty() => {
                debug!(
                    event_name = "conversation.generation.completed",
                    correlation_id = request.correlation_id,
                    session_id = %request.session.id.0,
                    provider = self.llm.provider_name(),
                    "model reply received"
                );
                GeneratedReply { text: text.trim().to_string(), outcome: GenerationOutcome::Model }
            }
            Ok(_) => GeneratedReply {
                text: EMPTY_REPLY_MESSAGE.to_string(),
                outcome: GenerationOutcome::Empty,
            },
            Err(error) => {
                warn!(
                    event_name = "conversation.generation.failed",
                    correlation_id = request.correlation_id,
                    session_id = %request.session.id.0,
                    provider = self.llm.provider_name(),
                    error_kind = error.kind(),
                    error = %error,
                    "model call failed; using fallback reply"
                );
                GeneratedReply {
                    text: FALLBACK_REPLY_MESSAGE.to_string(),
                    outcome: GenerationOutcome::Fallback {
                        error_kind: error.kind(),
                        detail: error.to_string(),
                    },
                }
            }
        }
    }
}

fn build_prompt(request: &GenerationRequest<'_>, history: &[Message]) -> Vec<ChatMessage> {
    let mut prompt = Vec::with_capacity(history.len() + 4);

    let locale = reply_locale(request.locale, request.config);
    prompt.push(ChatMessage::new(
        ChatRole::System,
        format!(
            "{}\n\nReply in the customer's language: {} ({}).",
            request.config.system_prompt,
            language_name(&locale),
            locale
        ),
    ));

    if let Some(order) = request.context.get(CONTEXT_ORDER_INFO) {
        prompt.push(ChatMessage::new(ChatRole::System, format!("Order information: {order}")));
    }
    if let Some(product) = request.context.get(CONTEXT_PRODUCT_INFO) {
        prompt.push(ChatMessage::new(ChatRole::System, format!("Product information: {product}")));
    }

    prompt.extend(history.iter().map(|message| {
        let role = match message.role {
            MessageRole::User => ChatRole::User,
            MessageRole::Assistant | MessageRole::Operator | MessageRole::System => {
                ChatRole::Assistant
            }
        };
        ChatMessage::new(role, message.content.clone())
    }));

    prompt.push(ChatMessage::new(ChatRole::User, request.user_text));
    prompt
}

/// The requested locale when the marketplace supports it, else the first
/// supported one.
pub fn reply_locale(requested: &str, config: &SupportConfig) -> String {
    let requested = primary_language(requested);
    if !requested.is_empty() && config.supports_locale(&requested) {
        return requested;
    }
    config
        .supported_locales
        .first()
        .map(|locale| primary_language(locale))
        .filter(|locale| !locale.is_empty())
        .unwrap_or_else(|| "en".to_string())
}

fn language_name(code: &str) -> &str {
    match code {
        "en" => "English",
        "es" => "Spanish",
        "de" => "German",
        "fr" => "French",
        "it" => "Italian",
        other => other,
    }
}
