use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("model service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode model response: {0}")]
    Decode(String),
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),
    #[error("model client misconfigured: {0}")]
    Configuration(String),
}

impl LlmError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Status { .. } => "status",
            Self::Decode(_) => "decode",
            Self::Timeout(_) => "timeout",
            Self::Configuration(_) => "configuration",
        }
    }
}

/// A chat-completion backend. `Ok(None)` means the service answered without text.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Option<String>, LlmError>;

    fn provider_name(&self) -> &'static str;
}

/// Replays queued results in order and records every request it sees.
/// Once the queue is empty it keeps answering with `fallback`.
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<Option<String>, LlmError>>>,
    fallback: Result<Option<String>, LlmError>,
    requests: Mutex<Vec<CompletionRequest>>,
    delay: Option<Duration>,
}

impl ScriptedLlmClient {
    pub fn replying(text: impl Into<String>) -> Self {
        Self::with_fallback(Ok(Some(text.into())))
    }

    pub fn failing(error: LlmError) -> Self {
        Self::with_fallback(Err(error))
    }

    pub fn with_fallback(fallback: Result<Option<String>, LlmError>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn then(self, result: Result<Option<String>, LlmError>) -> Self {
        match self.script.lock() {
            Ok(mut script) => script.push_back(result),
            Err(poisoned) => poisoned.into_inner().push_back(result),
        }
        self
    }

    /// Sleeps before every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        match self.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Option<String>, LlmError> {
        match self.requests.lock() {
            Ok(mut requests) => requests.push(request),
            Err(poisoned) => poisoned.into_inner().push(request),
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = match self.script.lock() {
            Ok(mut script) => script.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        next.unwrap_or_else(|| self.fallback.clone())
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::{ChatMessage, ChatRole, CompletionRequest, LlmClient, LlmError, ScriptedLlmClient};

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "test-model".to_string(),
            messages: vec![ChatMessage::new(ChatRole::User, "hello")],
            temperature: 0.2,
            max_tokens: 64,
        }
    }

    #[tokio::test]
    async fn scripted_client_replays_queue_then_fallback() {
        let client = ScriptedLlmClient::replying("steady")
            .then(Ok(None))
            .then(Err(LlmError::Status { status: 429, body: "slow down".to_string() }));

        assert_eq!(client.complete(request()).await, Ok(None));
        assert!(matches!(client.complete(request()).await, Err(LlmError::Status { status: 429, .. })));
        assert_eq!(client.complete(request()).await, Ok(Some("steady".to_string())));
        assert_eq!(client.requests().len(), 3);
    }
}
