use serde::{Deserialize, Serialize};

use bazaar_core::domain::intent::Intent;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    ProvideOrderId,
    TrackPackage,
    ViewReturnPolicy,
    ContactSupport,
    ViewCancellationPolicy,
    WaitForAgent,
    TalkToHuman,
}

impl SuggestedAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ProvideOrderId => "Provide your order ID",
            Self::TrackPackage => "Track your package",
            Self::ViewReturnPolicy => "View return policy",
            Self::ContactSupport => "Contact support",
            Self::ViewCancellationPolicy => "View cancellation policy",
            Self::WaitForAgent => "Wait for a support agent",
            Self::TalkToHuman => "Talk to a human agent",
        }
    }
}

/// Final state of a turn the hints are derived from.
#[derive(Clone, Copy, Debug)]
pub struct SuggestionInput {
    pub intent: Intent,
    pub order_resolved: bool,
    pub has_tracking: bool,
    pub escalated: bool,
}

pub fn suggested_actions(input: SuggestionInput) -> Vec<SuggestedAction> {
    let mut actions = Vec::new();

    match input.intent {
        Intent::OrderStatus | Intent::ShippingInfo => {
            if input.intent == Intent::OrderStatus && !input.order_resolved {
                actions.push(SuggestedAction::ProvideOrderId);
            }
            if input.has_tracking {
                actions.push(SuggestedAction::TrackPackage);
            }
        }
        Intent::ReturnRefund => {
            actions.push(SuggestedAction::ViewReturnPolicy);
            actions.push(SuggestedAction::ContactSupport);
        }
        Intent::Cancellation => actions.push(SuggestedAction::ViewCancellationPolicy),
        Intent::Unknown if !input.escalated => actions.push(SuggestedAction::TalkToHuman),
        _ => {}
    }

    if input.escalated {
        actions.push(SuggestedAction::WaitForAgent);
    }
    actions
}

#[cfg(test)]
mod tests {
    use bazaar_core::domain::intent::Intent;

    use super::{suggested_actions, SuggestedAction, SuggestionInput};

    fn input(intent: Intent) -> SuggestionInput {
        SuggestionInput { intent, order_resolved: false, has_tracking: false, escalated: false }
    }

    #[test]
    fn order_status_without_order_asks_for_the_id() {
        assert_eq!(suggested_actions(input(Intent::OrderStatus)), vec![SuggestedAction::ProvideOrderId]);

        let resolved = SuggestionInput { order_resolved: true, has_tracking: true, ..input(Intent::OrderStatus) };
        assert_eq!(suggested_actions(resolved), vec![SuggestedAction::TrackPackage]);
    }

    #[test]
    fn refunds_point_at_policy_and_contact() {
        let labels: Vec<_> =
            suggested_actions(input(Intent::ReturnRefund)).iter().map(SuggestedAction::label).collect();
        assert_eq!(labels, vec!["View return policy", "Contact support"]);
    }

    #[test]
    fn escalated_turns_tell_the_customer_to_wait() {
        let escalated = SuggestionInput { escalated: true, ..input(Intent::Complaint) };
        assert_eq!(suggested_actions(escalated), vec![SuggestedAction::WaitForAgent]);

        let unknown_escalated = SuggestionInput { escalated: true, ..input(Intent::Unknown) };
        assert_eq!(suggested_actions(unknown_escalated), vec![SuggestedAction::WaitForAgent]);
        assert_eq!(suggested_actions(input(Intent::Unknown)), vec![SuggestedAction::TalkToHuman]);
    }

    #[test]
    fn greetings_carry_no_hints() {
        assert!(suggested_actions(input(Intent::Greeting)).is_empty());
    }
}
