use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSummary {
    pub id: ProductId,
    pub sku: String,
    pub title: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub currency: String,
    pub stock_quantity: Option<u32>,
    pub active: bool,
}
