use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use bazaar_core::domain::intent::Entities;
use bazaar_core::domain::product::ProductId;
use bazaar_core::domain::session::{
    ContextPatch, Session, CONTEXT_ORDER_ID, CONTEXT_ORDER_INFO, CONTEXT_PRODUCT_ID,
    CONTEXT_PRODUCT_INFO, CONTEXT_TRACKING_NUMBER,
};
use bazaar_db::repositories::{OrderRepository, ProductRepository};

/// Looks up the order and product a turn refers to and returns the context
/// keys to merge. Lookup failures are logged and skipped.
pub struct ContextEnricher {
    orders: Arc<dyn OrderRepository>,
    products: Arc<dyn ProductRepository>,
}

impl ContextEnricher {
    pub fn new(orders: Arc<dyn OrderRepository>, products: Arc<dyn ProductRepository>) -> Self {
        Self { orders, products }
    }

    /// True when a lookup would have anything to resolve.
    pub fn has_references(session: &Session, entities: &Entities) -> bool {
        !entities.is_empty()
            || session.context.order_id().is_some()
            || session.context.product_id().is_some()
    }

    pub async fn enrich(&self, session: &Session, entities: &Entities) -> ContextPatch {
        let mut patch = ContextPatch::default();

        if let Some(tracking) = entities.tracking_number.as_deref() {
            patch.set(CONTEXT_TRACKING_NUMBER, Value::String(tracking.to_string()));
        }

        let order_ref = entities.order_id.as_deref().or_else(|| session.context.order_id());
        if let Some(order_ref) = order_ref {
            match self.orders.find_order(order_ref).await {
                Ok(Some(order)) => match serde_json::to_value(&order) {
                    Ok(info) => {
                        patch.set(CONTEXT_ORDER_ID, Value::String(order.id.0.clone()));
                        patch.set(CONTEXT_ORDER_INFO, info);
                    }
                    Err(error) => warn!(
                        event_name = "enrichment.order_encode_failed",
                        session_id = %session.id.0,
                        order_ref,
                        error = %error,
                        "could not encode order summary"
                    ),
                },
                Ok(None) => debug!(
                    event_name = "enrichment.order_not_found",
                    session_id = %session.id.0,
                    order_ref,
                    "order reference did not resolve"
                ),
                Err(error) => warn!(
                    event_name = "enrichment.order_lookup_failed",
                    session_id = %session.id.0,
                    order_ref,
                    error = %error,
                    "order lookup failed; continuing without order info"
                ),
            }
        }

        if let Some(product_ref) = session.context.product_id() {
            let product_id = ProductId(product_ref.to_string());
            match self.products.find_product(&product_id).await {
                Ok(Some(product)) => match serde_json::to_value(&product) {
                    Ok(info) => {
                        patch.set(CONTEXT_PRODUCT_ID, Value::String(product.id.0.clone()));
                        patch.set(CONTEXT_PRODUCT_INFO, info);
                    }
                    Err(error) => warn!(
                        event_name = "enrichment.product_encode_failed",
                        session_id = %session.id.0,
                        product_ref,
                        error = %error,
                        "could not encode product summary"
                    ),
                },
                Ok(None) => debug!(
                    event_name = "enrichment.product_not_found",
                    session_id = %session.id.0,
                    product_ref,
                    "product reference did not resolve"
                ),
                Err(error) => warn!(
                    event_name = "enrichment.product_lookup_failed",
                    session_id = %session.id.0,
                    product_ref,
                    error = %error,
                    "product lookup failed; continuing without product info"
                ),
            }
        }

        patch
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use serde_json::json;

    use bazaar_core::domain::intent::Entities;
    use bazaar_core::domain::order::{OrderId, OrderSummary};
    use bazaar_core::domain::product::{ProductId, ProductSummary};
    use bazaar_core::domain::session::{
        Session, SessionContext, SessionId, SessionKey, SessionStatus,
    };
    use bazaar_db::repositories::{
        InMemoryOrderRepository, InMemoryProductRepository, OrderRepository, ProductRepository,
        RepositoryError,
    };

    use super::ContextEnricher;

    fn session(context: SessionContext) -> Session {
        let now = Utc::now();
        Session {
            id: SessionId("S-1".to_string()),
            session_key: SessionKey("amazon_C-1".to_string()),
            marketplace: "amazon".to_string(),
            customer_id: Some("C-1".to_string()),
            customer_name: None,
            customer_email: None,
            customer_locale: "en".to_string(),
            context,
            status: SessionStatus::Active,
            message_count: 0,
            is_escalated: false,
            escalated_at: None,
            escalation_reason: None,
            last_message_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    fn order() -> OrderSummary {
        OrderSummary {
            id: OrderId("ord_1".to_string()),
            external_order_id: Some("99210".to_string()),
            marketplace: "amazon".to_string(),
            status: "shipped".to_string(),
            payment_status: Some("paid".to_string()),
            fulfillment_status: Some("fulfilled".to_string()),
            total: Decimal::new(4999, 2),
            currency: "EUR".to_string(),
            tracking_number: Some("AB12345678".to_string()),
            carrier: Some("DHL".to_string()),
            shipped_at: None,
            delivered_at: None,
            estimated_delivery: None,
            items: Vec::new(),
        }
    }

    fn product() -> ProductSummary {
        ProductSummary {
            id: ProductId("prod_7".to_string()),
            sku: "MUG-01".to_string(),
            title: "Stoneware mug".to_string(),
            description: None,
            price: Decimal::new(1250, 2),
            currency: "EUR".to_string(),
            stock_quantity: Some(4),
            active: true,
        }
    }

    struct FailingOrders;

    #[async_trait]
    impl OrderRepository for FailingOrders {
        async fn find_order(&self, _: &str) -> Result<Option<OrderSummary>, RepositoryError> {
            Err(RepositoryError::Decode("bad total".to_string()))
        }

        async fn save(&self, _: OrderSummary) -> Result<(), RepositoryError> {
            Ok(())
        }
    }

    async fn enricher() -> ContextEnricher {
        let orders = Arc::new(InMemoryOrderRepository::default());
        orders.save(order()).await.expect("save order");
        let products = Arc::new(InMemoryProductRepository::default());
        products.save(product()).await.expect("save product");
        ContextEnricher::new(orders, products)
    }

    #[tokio::test]
    async fn extracted_external_id_resolves_to_canonical_order() {
        let entities = Entities { order_id: Some("99210".to_string()), tracking_number: None };
        let patch = enricher().await.enrich(&session(SessionContext::default()), &entities).await;

        assert_eq!(patch.get("orderId"), Some(&json!("ord_1")));
        assert_eq!(patch.get("orderInfo").and_then(|info| info.get("status")), Some(&json!("shipped")));
    }

    #[tokio::test]
    async fn context_ids_are_used_when_nothing_was_extracted() {
        let mut context = SessionContext::default();
        context.insert("orderId", json!("ord_1"));
        context.insert("productId", json!("prod_7"));

        let patch = enricher().await.enrich(&session(context), &Entities::default()).await;

        assert!(patch.get("orderInfo").is_some());
        assert_eq!(patch.get("productId"), Some(&json!("prod_7")));
        assert_eq!(
            patch.get("productInfo").and_then(|info| info.get("title")),
            Some(&json!("Stoneware mug"))
        );
    }

    #[tokio::test]
    async fn unknown_references_produce_no_lookup_keys() {
        let entities = Entities {
            order_id: Some("404".to_string()),
            tracking_number: Some("ZX98765432".to_string()),
        };
        let patch = enricher().await.enrich(&session(SessionContext::default()), &entities).await;

        assert!(patch.get("orderInfo").is_none());
        assert!(patch.get("orderId").is_none());
        assert_eq!(patch.get("trackingNumber"), Some(&json!("ZX98765432")));
    }

    #[tokio::test]
    async fn lookup_failures_are_absorbed() {
        let enricher =
            ContextEnricher::new(Arc::new(FailingOrders), Arc::new(InMemoryProductRepository::default()));
        let entities = Entities { order_id: Some("99210".to_string()), tracking_number: None };

        let patch = enricher.enrich(&session(SessionContext::default()), &entities).await;
        assert!(patch.is_empty());
    }

    #[test]
    fn sessions_without_ids_have_nothing_to_enrich() {
        let bare = session(SessionContext::default());
        assert!(!ContextEnricher::has_references(&bare, &Entities::default()));

        let mut context = SessionContext::default();
        context.insert("productId", json!("prod_7"));
        assert!(ContextEnricher::has_references(&session(context), &Entities::default()));
    }
}
