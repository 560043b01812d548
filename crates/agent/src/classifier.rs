use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use bazaar_core::domain::intent::{Entities, Intent, IntentResult, UNKNOWN_CONFIDENCE};

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("could not read intent rules `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse intent rules: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid intent rule set: {0}")]
    Invalid(String),
    #[error("invalid entity pattern `{pattern}`: {source}")]
    Pattern { pattern: String, source: regex::Error },
}

/// One row of the classification table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentRule {
    pub intent: Intent,
    pub confidence: f64,
    pub keywords: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityPatterns {
    pub order_id: Vec<String>,
    pub tracking_number: Vec<String>,
}

/// Keyword table and entity patterns, in evaluation order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentRuleSet {
    #[serde(rename = "rule")]
    pub rules: Vec<IntentRule>,
    pub entities: EntityPatterns,
}

fn rule(intent: Intent, confidence: f64, keywords: &[&str]) -> IntentRule {
    IntentRule {
        intent,
        confidence,
        keywords: keywords.iter().map(|keyword| keyword.to_string()).collect(),
    }
}

impl Default for IntentRuleSet {
    fn default() -> Self {
        Self {
            rules: vec![
                rule(
                    Intent::Complaint,
                    0.9,
                    &[
                        "terrible",
                        "awful",
                        "horrible",
                        "worst",
                        "unacceptable",
                        "disappointed",
                        "angry",
                        "furious",
                        "complaint",
                        "complain",
                        "scam",
                        "ridiculous",
                        "rude",
                    ],
                ),
                rule(
                    Intent::ReturnRefund,
                    0.85,
                    &["refund", "return", "money back", "exchange", "send it back", "reimburse"],
                ),
                rule(Intent::Cancellation, 0.85, &["cancel", "cancellation"]),
                rule(
                    Intent::OrderStatus,
                    0.8,
                    &[
                        "order status",
                        "where is my order",
                        "my order",
                        "order number",
                        "track",
                        "status of",
                    ],
                ),
                rule(
                    Intent::ShippingInfo,
                    0.8,
                    &[
                        "shipping", "shipment", "delivery", "deliver", "arrive", "courier",
                        "tracking", "customs",
                    ],
                ),
                rule(
                    Intent::PaymentIssue,
                    0.8,
                    &["payment", "charged", "invoice", "paid", "card", "billing"],
                ),
                rule(
                    Intent::ProductInquiry,
                    0.7,
                    &[
                        "product",
                        "size",
                        "color",
                        "material",
                        "stock",
                        "available",
                        "dimensions",
                        "compatible",
                    ],
                ),
                rule(
                    Intent::Greeting,
                    0.6,
                    &[
                        "hello",
                        "good morning",
                        "good afternoon",
                        "good evening",
                        "greetings",
                        "hey there",
                        "hi there",
                        "howdy",
                    ],
                ),
            ],
            entities: EntityPatterns {
                order_id: vec![
                    r"(?i)\bORD-([A-Z0-9][A-Z0-9-]*)".to_string(),
                    r"(?i)\border\b\s*(?:#|no\.?|number|id)?\s*[:#]?\s*([A-Z0-9][A-Z0-9-]*\d[A-Z0-9-]*)"
                        .to_string(),
                ],
                tracking_number: vec![
                    r"(?i)\btracking\s*(?:number|no\.?|#|id|code)?(?:\s+is)?\s*[:#]?\s*([A-Z0-9]{10,})"
                        .to_string(),
                ],
            },
        }
    }
}

impl IntentRuleSet {
    pub fn from_toml_str(raw: &str) -> Result<Self, ClassifierError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self, ClassifierError> {
        let raw = fs::read_to_string(path)
            .map_err(|source| ClassifierError::ReadFile { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&raw)
    }
}

#[derive(Clone, Debug)]
struct CompiledRule {
    intent: Intent,
    confidence: f64,
    keywords: Vec<String>,
}

/// Deterministic keyword classifier with regex entity extraction.
#[derive(Clone, Debug)]
pub struct IntentClassifier {
    rules: Vec<CompiledRule>,
    order_patterns: Vec<Regex>,
    tracking_patterns: Vec<Regex>,
}

impl IntentClassifier {
    pub fn new(rule_set: IntentRuleSet) -> Result<Self, ClassifierError> {
        if rule_set.rules.is_empty() {
            return Err(ClassifierError::Invalid("at least one rule is required".to_string()));
        }

        let mut rules = Vec::with_capacity(rule_set.rules.len());
        for rule in rule_set.rules {
            if rule.intent == Intent::Unknown {
                return Err(ClassifierError::Invalid(
                    "UNKNOWN is the no-match result and cannot be a rule".to_string(),
                ));
            }
            if !(rule.confidence > 0.0 && rule.confidence <= 1.0) {
                return Err(ClassifierError::Invalid(format!(
                    "confidence for {} must be in (0, 1], got {}",
                    rule.intent.as_str(),
                    rule.confidence
                )));
            }
            let keywords: Vec<String> = rule
                .keywords
                .iter()
                .map(|keyword| keyword.trim().to_lowercase())
                .filter(|keyword| !keyword.is_empty())
                .collect();
            if keywords.is_empty() {
                return Err(ClassifierError::Invalid(format!(
                    "rule for {} has no keywords",
                    rule.intent.as_str()
                )));
            }
            rules.push(CompiledRule { intent: rule.intent, confidence: rule.confidence, keywords });
        }

        Ok(Self {
            rules,
            order_patterns: compile_patterns(&rule_set.entities.order_id)?,
            tracking_patterns: compile_patterns(&rule_set.entities.tracking_number)?,
        })
    }

    pub fn with_default_rules() -> Result<Self, ClassifierError> {
        Self::new(IntentRuleSet::default())
    }

    pub fn from_path(path: Option<&Path>) -> Result<Self, ClassifierError> {
        match path {
            Some(path) => Self::new(IntentRuleSet::load(path)?),
            None => Self::with_default_rules(),
        }
    }

    pub fn classify(&self, message: &str) -> IntentResult {
        let lowered = message.to_lowercase();

        let mut best: Option<&CompiledRule> = None;
        for rule in &self.rules {
            if !rule.keywords.iter().any(|keyword| lowered.contains(keyword.as_str())) {
                continue;
            }
            // strict comparison: the earlier row keeps ties
            if best.map_or(true, |current| rule.confidence > current.confidence) {
                best = Some(rule);
            }
        }

        let (intent, confidence) = match best {
            Some(rule) => (rule.intent, rule.confidence),
            None => (Intent::Unknown, UNKNOWN_CONFIDENCE),
        };

        IntentResult { intent, confidence, entities: self.extract_entities(message) }
    }

    pub fn extract_entities(&self, message: &str) -> Entities {
        Entities {
            order_id: first_capture(&self.order_patterns, message),
            tracking_number: first_capture(&self.tracking_patterns, message),
        }
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, ClassifierError> {
    patterns
        .iter()
        .map(|pattern| {
            let regex = Regex::new(pattern)
                .map_err(|source| ClassifierError::Pattern { pattern: pattern.clone(), source })?;
            if regex.captures_len() != 2 {
                return Err(ClassifierError::Invalid(format!(
                    "pattern `{pattern}` must have exactly one capture group"
                )));
            }
            Ok(regex)
        })
        .collect()
}

fn first_capture(patterns: &[Regex], message: &str) -> Option<String> {
    patterns.iter().find_map(|pattern| {
        pattern
            .captures(message)
            .and_then(|captures| captures.get(1))
            .map(|value| value.as_str().to_string())
    })
}
