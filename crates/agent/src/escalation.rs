use bazaar_core::domain::intent::Intent;
use bazaar_core::domain::support_config::SupportConfig;

/// Messages one automated turn adds to a session (USER + ASSISTANT).
pub const AUTOMATED_TURN_MESSAGES: u32 = 2;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EscalationReason {
    ComplaintDetected,
    KeywordDetected { keyword: String },
    MessageLimitReached { threshold: u32 },
}

impl EscalationReason {
    pub fn message(&self) -> &'static str {
        match self {
            Self::ComplaintDetected => "Customer complaint detected.",
            Self::KeywordDetected { .. } => "Escalation keyword detected.",
            Self::MessageLimitReached { .. } => "Message limit reached.",
        }
    }

    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::ComplaintDetected => "complaint_detected",
            Self::KeywordDetected { .. } => "keyword_detected",
            Self::MessageLimitReached { .. } => "message_limit_reached",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EscalationDecision {
    Continue,
    Escalate { reason: EscalationReason },
}

impl EscalationDecision {
    pub fn should_escalate(&self) -> bool {
        matches!(self, Self::Escalate { .. })
    }

    pub fn reason(&self) -> Option<&EscalationReason> {
        match self {
            Self::Continue => None,
            Self::Escalate { reason } => Some(reason),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct EscalationInput<'a> {
    pub intent: Intent,
    pub message: &'a str,
    /// Count before this turn's messages are added.
    pub message_count: u32,
    pub config: &'a SupportConfig,
}

/// Ordered rule chain; the first matching rule decides.
#[derive(Clone, Copy, Debug, Default)]
pub struct EscalationPolicy;

impl EscalationPolicy {
    pub fn decide(&self, input: EscalationInput<'_>) -> EscalationDecision {
        if input.intent == Intent::Complaint {
            return EscalationDecision::Escalate { reason: EscalationReason::ComplaintDetected };
        }

        if input.config.auto_escalate_negative_sentiment {
            let lowered = input.message.to_lowercase();
            let keyword = input
                .config
                .escalation_keywords
                .iter()
                .map(|keyword| keyword.trim().to_lowercase())
                .find(|keyword| !keyword.is_empty() && lowered.contains(keyword.as_str()));
            if let Some(keyword) = keyword {
                return EscalationDecision::Escalate {
                    reason: EscalationReason::KeywordDetected { keyword },
                };
            }
        }

        if let Some(threshold) = input.config.auto_escalate_after_messages.filter(|value| *value > 0)
        {
            if input.message_count.saturating_add(AUTOMATED_TURN_MESSAGES) >= threshold {
                return EscalationDecision::Escalate {
                    reason: EscalationReason::MessageLimitReached { threshold },
                };
            }
        }

        EscalationDecision::Continue
    }
}

#[cfg(test)]
mod tests {
    use bazaar_core::domain::intent::Intent;
    use bazaar_core::domain::support_config::SupportConfig;

    use super::{EscalationDecision, EscalationInput, EscalationPolicy, EscalationReason};

    fn quiet_config() -> SupportConfig {
        SupportConfig {
            escalation_keywords: Vec::new(),
            auto_escalate_negative_sentiment: false,
            auto_escalate_after_messages: None,
            ..SupportConfig::default()
        }
    }

    fn decide(intent: Intent, message: &str, count: u32, config: &SupportConfig) -> EscalationDecision {
        EscalationPolicy.decide(EscalationInput { intent, message, message_count: count, config })
    }

    #[test]
    fn complaint_escalates_regardless_of_config() {
        let decision = decide(Intent::Complaint, "this is awful", 0, &quiet_config());
        assert_eq!(
            decision,
            EscalationDecision::Escalate { reason: EscalationReason::ComplaintDetected }
        );
        assert_eq!(decision.reason().map(EscalationReason::message), Some("Customer complaint detected."));
    }

    #[test]
    fn keywords_only_escalate_when_flag_is_on() {
        let mut config = quiet_config();
        config.escalation_keywords = vec!["Manager".to_string()];

        let off = decide(Intent::Unknown, "let me talk to your manager", 0, &config);
        assert!(!off.should_escalate());

        config.auto_escalate_negative_sentiment = true;
        let on = decide(Intent::Unknown, "let me talk to your MANAGER", 0, &config);
        assert_eq!(
            on.reason(),
            Some(&EscalationReason::KeywordDetected { keyword: "manager".to_string() })
        );
    }

    #[test]
    fn session_two_below_threshold_escalates_on_its_next_turn() {
        let mut config = quiet_config();
        config.auto_escalate_after_messages = Some(5);

        assert!(!decide(Intent::OrderStatus, "any news?", 2, &config).should_escalate());
        let decision = decide(Intent::OrderStatus, "any news?", 3, &config);
        assert_eq!(decision.reason().map(EscalationReason::message), Some("Message limit reached."));
    }

    #[test]
    fn zero_threshold_disables_volume_rule() {
        let mut config = quiet_config();
        config.auto_escalate_after_messages = Some(0);
        assert!(!decide(Intent::Greeting, "hello", 40, &config).should_escalate());
    }

    #[test]
    fn complaint_takes_precedence_over_keyword_and_volume() {
        let mut config = SupportConfig::default();
        config.auto_escalate_after_messages = Some(1);
        let decision = decide(Intent::Complaint, "terrible, get me a human", 10, &config);
        assert_eq!(decision.reason(), Some(&EscalationReason::ComplaintDetected));
    }
}
