//! HTTP chat-completion clients.
//!
//! `OpenAiCompatibleClient` speaks `/chat/completions` and serves both OpenAI
//! and Ollama (through its OpenAI-compatible endpoint). `AnthropicClient`
//! speaks the Messages API. Neither retries: a non-success status is returned
//! to the caller as an `LlmError`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::debug;

use bazaar_core::config::{LlmConfig, LlmProvider};

use crate::llm::{ChatMessage, ChatRole, CompletionRequest, LlmClient, LlmError};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const ANTHROPIC_API_VERSION: &str = "2023-06-01";

pub fn build_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    let timeout = Duration::from_secs(config.timeout_secs.max(1));
    let api_key = config.api_key.as_ref().map(|key| key.expose_secret().to_string());

    match config.provider {
        LlmProvider::OpenAi => {
            let base_url = config.base_url.clone().unwrap_or_else(|| OPENAI_BASE_URL.to_string());
            let api_key = api_key.ok_or_else(|| {
                LlmError::Configuration("llm.api_key is required for openai".to_string())
            })?;
            Ok(Arc::new(OpenAiCompatibleClient::new(
                "openai",
                &base_url,
                Some(api_key.as_str()),
                timeout,
            )?))
        }
        LlmProvider::Ollama => {
            let base_url = config.base_url.clone().ok_or_else(|| {
                LlmError::Configuration("llm.base_url is required for ollama".to_string())
            })?;
            let base_url = format!("{}/v1", base_url.trim_end_matches('/'));
            Ok(Arc::new(OpenAiCompatibleClient::new(
                "ollama",
                &base_url,
                api_key.as_deref(),
                timeout,
            )?))
        }
        LlmProvider::Anthropic => {
            let base_url =
                config.base_url.clone().unwrap_or_else(|| ANTHROPIC_BASE_URL.to_string());
            let api_key = api_key.ok_or_else(|| {
                LlmError::Configuration("llm.api_key is required for anthropic".to_string())
            })?;
            Ok(Arc::new(AnthropicClient::new(&base_url, &api_key, timeout)?))
        }
    }
}

fn header_value(value: &str, name: &str) -> Result<HeaderValue, LlmError> {
    HeaderValue::from_str(value)
        .map_err(|error| LlmError::Configuration(format!("invalid {name} header value: {error}")))
}

fn http_client(headers: HeaderMap, timeout: Duration) -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|error| LlmError::Configuration(format!("failed to build HTTP client: {error}")))
}

async fn post_json<T: Serialize + ?Sized>(
    client: &reqwest::Client,
    url: &str,
    body: &T,
) -> Result<String, LlmError> {
    let response = client.post(url).json(body).send().await.map_err(|error| {
        if error.is_timeout() {
            LlmError::Transport(format!("request timed out: {error}"))
        } else {
            LlmError::Transport(error.to_string())
        }
    })?;

    let status = response.status();
    debug!(event_name = "llm.response.received", status = %status, url, "model response received");

    let text = response.text().await.map_err(|error| LlmError::Transport(error.to_string()))?;
    if !status.is_success() {
        return Err(LlmError::Status { status: status.as_u16(), body: text });
    }
    Ok(text)
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.filter(|value| !value.trim().is_empty())
}

#[derive(Debug, Serialize)]
pub(crate) struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
}

pub(crate) fn openai_request(request: &CompletionRequest) -> OpenAiChatRequest<'_> {
    OpenAiChatRequest {
        model: &request.model,
        messages: &request.messages,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
    }
}

pub(crate) fn parse_openai_response(body: &str) -> Result<Option<String>, LlmError> {
    let parsed: OpenAiChatResponse =
        serde_json::from_str(body).map_err(|error| LlmError::Decode(error.to_string()))?;
    Ok(non_empty(parsed.choices.into_iter().next().and_then(|choice| choice.message.content)))
}

#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    name: &'static str,
    client: reqwest::Client,
    endpoint: String,
}

impl std::fmt::Debug for OpenAiCompatibleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleClient")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl OpenAiCompatibleClient {
    pub fn new(
        name: &'static str,
        base_url: &str,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(api_key) = api_key.filter(|key| !key.trim().is_empty()) {
            headers.insert(AUTHORIZATION, header_value(&format!("Bearer {api_key}"), "authorization")?);
        }

        Ok(Self {
            name,
            client: http_client(headers, timeout)?,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Option<String>, LlmError> {
        let body = post_json(&self.client, &self.endpoint, &openai_request(&request)).await?;
        parse_openai_response(&body)
    }

    fn provider_name(&self) -> &'static str {
        self.name
    }
}

#[derive(Debug, PartialEq, Serialize)]
pub(crate) struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// System turns move to the top-level `system` field, consecutive turns with
/// the same role are merged, and the conversation starts with a user turn.
pub(crate) fn anthropic_request(request: &CompletionRequest) -> AnthropicRequest<'_> {
    let mut system_parts: Vec<String> = Vec::new();
    let mut messages: Vec<AnthropicMessage> = Vec::new();

    for message in &request.messages {
        let role = match message.role {
            ChatRole::System => {
                system_parts.push(message.content.clone());
                continue;
            }
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        };

        if messages.is_empty() && role == "assistant" {
            system_parts.push(format!("Earlier assistant message: {}", message.content));
            continue;
        }

        match messages.last_mut() {
            Some(last) if last.role == role => {
                last.content.push_str("\n\n");
                last.content.push_str(&message.content);
            }
            _ => messages.push(AnthropicMessage { role, content: message.content.clone() }),
        }
    }

    AnthropicRequest {
        model: &request.model,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        system: (!system_parts.is_empty()).then(|| system_parts.join("\n\n")),
        messages,
    }
}

pub(crate) fn parse_anthropic_response(body: &str) -> Result<Option<String>, LlmError> {
    let parsed: AnthropicResponse =
        serde_json::from_str(body).map_err(|error| LlmError::Decode(error.to_string()))?;
    let text: String = parsed
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("");
    Ok(non_empty(Some(text)))
}

#[derive(Clone)]
pub struct AnthropicClient {
    client: reqwest::Client,
    endpoint: String,
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl AnthropicClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", header_value(api_key, "x-api-key")?);
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_API_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(Self {
            client: http_client(headers, timeout)?,
            endpoint: format!("{}/messages", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Option<String>, LlmError> {
        let body = post_json(&self.client, &self.endpoint, &anthropic_request(&request)).await?;
        parse_anthropic_response(&body)
    }

    fn provider_name(&self) -> &'static str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use bazaar_core::config::{LlmConfig, LlmProvider};

    use super::{
        anthropic_request, build_client, openai_request, parse_anthropic_response,
        parse_openai_response, AnthropicMessage,
    };
    use crate::llm::{ChatMessage, ChatRole, CompletionRequest, LlmClient, LlmError};

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![
                ChatMessage::new(ChatRole::System, "Be helpful."),
                ChatMessage::new(ChatRole::System, "Order information: {}"),
                ChatMessage::new(ChatRole::Assistant, "Welcome!"),
                ChatMessage::new(ChatRole::User, "Where is my parcel?"),
                ChatMessage::new(ChatRole::Assistant, "Let me check."),
                ChatMessage::new(ChatRole::Assistant, "An agent replied."),
                ChatMessage::new(ChatRole::User, "Thanks"),
            ],
            temperature: 0.7,
            max_tokens: 500,
        }
    }

    #[test]
    fn openai_body_carries_model_parameters_and_roles() {
        let request = request();
        let body = serde_json::to_value(openai_request(&request)).expect("serialize");

        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 500);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][3]["role"], "user");
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(7));
    }

    #[test]
    fn openai_response_text_is_extracted_and_blank_is_none() {
        let ok = r#"{"choices":[{"message":{"role":"assistant","content":"It shipped."}}]}"#;
        assert_eq!(parse_openai_response(ok), Ok(Some("It shipped.".to_string())));

        let blank = r#"{"choices":[{"message":{"role":"assistant","content":"  "}}]}"#;
        assert_eq!(parse_openai_response(blank), Ok(None));

        let null = r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#;
        assert_eq!(parse_openai_response(null), Ok(None));

        assert!(matches!(parse_openai_response("not json"), Err(LlmError::Decode(_))));
    }

    #[test]
    fn anthropic_body_lifts_system_and_merges_same_role_turns() {
        let request = request();
        let body = anthropic_request(&request);

        let system = body.system.clone().expect("system prompt");
        assert!(system.starts_with("Be helpful."));
        assert!(system.contains("Order information"));
        assert!(system.contains("Earlier assistant message: Welcome!"));
        assert_eq!(
            body.messages,
            vec![
                AnthropicMessage { role: "user", content: "Where is my parcel?".to_string() },
                AnthropicMessage {
                    role: "assistant",
                    content: "Let me check.\n\nAn agent replied.".to_string()
                },
                AnthropicMessage { role: "user", content: "Thanks".to_string() },
            ]
        );
    }

    #[test]
    fn anthropic_response_joins_text_blocks() {
        let body = r#"{"content":[{"type":"text","text":"Hello "},{"type":"text","text":"there"}]}"#;
        assert_eq!(parse_anthropic_response(body), Ok(Some("Hello there".to_string())));
        assert_eq!(parse_anthropic_response(r#"{"content":[]}"#), Ok(None));
    }

    #[test]
    fn build_client_requires_an_api_key_for_hosted_providers() {
        let config = LlmConfig {
            provider: LlmProvider::Anthropic,
            api_key: None,
            base_url: None,
            model: "claude".to_string(),
            timeout_secs: 10,
        };
        assert!(matches!(build_client(&config), Err(LlmError::Configuration(_))));

        let config = LlmConfig {
            provider: LlmProvider::OpenAi,
            api_key: Some(SecretString::from("sk-test".to_string())),
            ..config
        };
        let client = build_client(&config).expect("openai client");
        assert_eq!(client.provider_name(), "openai");
    }
}
