use serde::{Deserialize, Serialize};

/// Confidence reported when no keyword rule matches.
pub const UNKNOWN_CONFIDENCE: f64 = 0.3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    Greeting,
    OrderStatus,
    ShippingInfo,
    ReturnRefund,
    Cancellation,
    PaymentIssue,
    ProductInquiry,
    Complaint,
    Unknown,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "GREETING",
            Self::OrderStatus => "ORDER_STATUS",
            Self::ShippingInfo => "SHIPPING_INFO",
            Self::ReturnRefund => "RETURN_REFUND",
            Self::Cancellation => "CANCELLATION",
            Self::PaymentIssue => "PAYMENT_ISSUE",
            Self::ProductInquiry => "PRODUCT_INQUIRY",
            Self::Complaint => "COMPLAINT",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "GREETING" => Some(Self::Greeting),
            "ORDER_STATUS" => Some(Self::OrderStatus),
            "SHIPPING_INFO" => Some(Self::ShippingInfo),
            "RETURN_REFUND" => Some(Self::ReturnRefund),
            "CANCELLATION" => Some(Self::Cancellation),
            "PAYMENT_ISSUE" => Some(Self::PaymentIssue),
            "PRODUCT_INQUIRY" => Some(Self::ProductInquiry),
            "COMPLAINT" => Some(Self::Complaint),
            "UNKNOWN" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// Structured values pulled out of a customer message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_number: Option<String>,
}

impl Entities {
    pub fn is_empty(&self) -> bool {
        self.order_id.is_none() && self.tracking_number.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent: Intent,
    pub confidence: f64,
    pub entities: Entities,
}
