use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Marketplace value of the fallback configuration row.
pub const DEFAULT_MARKETPLACE: &str = "default";

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 500;
pub const DEFAULT_AUTO_ESCALATE_AFTER_MESSAGES: u32 = 20;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful customer support assistant for a \
cross-border marketplace seller. Answer questions about orders, shipping, returns, payments and \
products politely and concisely. Only state order or product details that appear in the \
information provided to you; never invent tracking numbers, dates or prices. If you cannot \
resolve the request, offer to connect the customer with a human support agent.";

/// Per-marketplace knobs for response generation and escalation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SupportConfig {
    pub marketplace: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: String,
    pub escalation_keywords: Vec<String>,
    pub auto_escalate_negative_sentiment: bool,
    pub auto_escalate_after_messages: Option<u32>,
    pub supported_locales: Vec<String>,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

impl Default for SupportConfig {
    fn default() -> Self {
        Self {
            marketplace: DEFAULT_MARKETPLACE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            escalation_keywords: [
                "manager",
                "supervisor",
                "human",
                "real person",
                "lawyer",
                "chargeback",
                "fraud",
                "report you",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            auto_escalate_negative_sentiment: true,
            auto_escalate_after_messages: Some(DEFAULT_AUTO_ESCALATE_AFTER_MESSAGES),
            supported_locales: ["en", "es", "de", "fr", "it"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            is_active: true,
            updated_at: DateTime::<Utc>::default(),
        }
    }
}

impl SupportConfig {
    pub fn for_marketplace(marketplace: impl Into<String>) -> Self {
        Self { marketplace: marketplace.into(), ..Self::default() }
    }

    pub fn supports_locale(&self, locale: &str) -> bool {
        let language = primary_language(locale);
        self.supported_locales.iter().any(|supported| primary_language(supported) == language)
    }
}

/// `pt-BR` -> `pt`, `en_US` -> `en`.
pub fn primary_language(locale: &str) -> String {
    locale.trim().split(['-', '_']).next().unwrap_or_default().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::{primary_language, SupportConfig, DEFAULT_MARKETPLACE};

    #[test]
    fn default_config_is_the_active_fallback_row() {
        let config = SupportConfig::default();
        assert_eq!(config.marketplace, DEFAULT_MARKETPLACE);
        assert!(config.is_active);
        assert!(!config.escalation_keywords.is_empty());
    }

    #[test]
    fn locale_support_compares_primary_language() {
        let config = SupportConfig::default();
        assert!(config.supports_locale("es-MX"));
        assert!(config.supports_locale("DE"));
        assert!(!config.supports_locale("ja-JP"));
        assert_eq!(primary_language("pt_BR"), "pt");
    }
}
