use std::str::FromStr;

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::Row;

use bazaar_core::domain::order::{OrderId, OrderItem, OrderSummary};
use bazaar_core::domain::product::ProductId;

use super::{
    decode_err, decode_u32, format_timestamp, parse_optional_timestamp, OrderRepository,
    RepositoryError,
};
use crate::DbPool;

pub struct SqlOrderRepository {
    pool: DbPool,
}

impl SqlOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn parse_decimal(column: &str, raw: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(raw).map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}

fn row_to_item(row: &sqlx::sqlite::SqliteRow) -> Result<OrderItem, RepositoryError> {
    let price: String = row.try_get("price").map_err(decode_err)?;
    let product_id: Option<String> = row.try_get("product_id").map_err(decode_err)?;

    Ok(OrderItem {
        product_id: product_id.map(ProductId),
        title: row.try_get("title").map_err(decode_err)?,
        quantity: decode_u32("quantity", row.try_get("quantity").map_err(decode_err)?)?,
        price: parse_decimal("price", &price)?,
    })
}

fn row_to_order(
    row: &sqlx::sqlite::SqliteRow,
    items: Vec<OrderItem>,
) -> Result<OrderSummary, RepositoryError> {
    let total: String = row.try_get("total").map_err(decode_err)?;

    Ok(OrderSummary {
        id: OrderId(row.try_get("id").map_err(decode_err)?),
        external_order_id: row.try_get("external_order_id").map_err(decode_err)?,
        marketplace: row.try_get("marketplace").map_err(decode_err)?,
        status: row.try_get("status").map_err(decode_err)?,
        payment_status: row.try_get("payment_status").map_err(decode_err)?,
        fulfillment_status: row.try_get("fulfillment_status").map_err(decode_err)?,
        total: parse_decimal("total", &total)?,
        currency: row.try_get("currency").map_err(decode_err)?,
        tracking_number: row.try_get("tracking_number").map_err(decode_err)?,
        carrier: row.try_get("carrier").map_err(decode_err)?,
        shipped_at: parse_optional_timestamp(
            "shipped_at",
            row.try_get("shipped_at").map_err(decode_err)?,
        )?,
        delivered_at: parse_optional_timestamp(
            "delivered_at",
            row.try_get("delivered_at").map_err(decode_err)?,
        )?,
        estimated_delivery: parse_optional_timestamp(
            "estimated_delivery",
            row.try_get("estimated_delivery").map_err(decode_err)?,
        )?,
        items,
    })
}

#[async_trait::async_trait]
impl OrderRepository for SqlOrderRepository {
    async fn find_order(
        &self,
        id_or_external_id: &str,
    ) -> Result<Option<OrderSummary>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, external_order_id, marketplace, status, payment_status,
                    fulfillment_status, total, currency, tracking_number, carrier, shipped_at,
                    delivered_at, estimated_delivery
             FROM marketplace_order
             WHERE id = ?1 OR external_order_id = ?1
             ORDER BY CASE WHEN id = ?1 THEN 0 ELSE 1 END
             LIMIT 1",
        )
        .bind(id_or_external_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let order_id: String = row.try_get("id").map_err(decode_err)?;
        let item_rows = sqlx::query(
            "SELECT product_id, title, quantity, price
             FROM marketplace_order_item
             WHERE order_id = ?
             ORDER BY position ASC, id ASC",
        )
        .bind(&order_id)
        .fetch_all(&self.pool)
        .await?;
        let items = item_rows.iter().map(row_to_item).collect::<Result<Vec<_>, _>>()?;

        row_to_order(&row, items).map(Some)
    }

    async fn save(&self, order: OrderSummary) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO marketplace_order (id, external_order_id, marketplace, status,
                                            payment_status, fulfillment_status, total, currency,
                                            tracking_number, carrier, shipped_at, delivered_at,
                                            estimated_delivery, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 external_order_id = excluded.external_order_id,
                 marketplace = excluded.marketplace,
                 status = excluded.status,
                 payment_status = excluded.payment_status,
                 fulfillment_status = excluded.fulfillment_status,
                 total = excluded.total,
                 currency = excluded.currency,
                 tracking_number = excluded.tracking_number,
                 carrier = excluded.carrier,
                 shipped_at = excluded.shipped_at,
                 delivered_at = excluded.delivered_at,
                 estimated_delivery = excluded.estimated_delivery",
        )
        .bind(&order.id.0)
        .bind(&order.external_order_id)
        .bind(&order.marketplace)
        .bind(&order.status)
        .bind(&order.payment_status)
        .bind(&order.fulfillment_status)
        .bind(order.total.to_string())
        .bind(&order.currency)
        .bind(&order.tracking_number)
        .bind(&order.carrier)
        .bind(order.shipped_at.map(format_timestamp))
        .bind(order.delivered_at.map(format_timestamp))
        .bind(order.estimated_delivery.map(format_timestamp))
        .bind(format_timestamp(Utc::now()))
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM marketplace_order_item WHERE order_id = ?")
            .bind(&order.id.0)
            .execute(&mut *tx)
            .await?;

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO marketplace_order_item (order_id, position, product_id, title,
                                                     quantity, price)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&order.id.0)
            .bind(position as i64)
            .bind(item.product_id.as_ref().map(|id| id.0.as_str()))
            .bind(&item.title)
            .bind(i64::from(item.quantity))
            .bind(item.price.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rust_decimal::Decimal;

    use bazaar_core::domain::order::{OrderId, OrderItem, OrderSummary};
    use bazaar_core::domain::product::ProductId;

    use super::SqlOrderRepository;
    use crate::repositories::OrderRepository;
    use crate::{connect_with_settings, migrations};

    fn order() -> OrderSummary {
        OrderSummary {
            id: OrderId("ord_1".to_string()),
            external_order_id: Some("99210".to_string()),
            marketplace: "amazon".to_string(),
            status: "shipped".to_string(),
            payment_status: Some("paid".to_string()),
            fulfillment_status: Some("fulfilled".to_string()),
            total: Decimal::from_str("59.90").expect("decimal"),
            currency: "EUR".to_string(),
            tracking_number: Some("AB12345678".to_string()),
            carrier: Some("DHL".to_string()),
            shipped_at: None,
            delivered_at: None,
            estimated_delivery: None,
            items: vec![OrderItem {
                product_id: Some(ProductId("P-1".to_string())),
                title: "Linen shirt".to_string(),
                quantity: 2,
                price: Decimal::from_str("29.95").expect("decimal"),
            }],
        }
    }

    #[tokio::test]
    async fn orders_resolve_by_internal_or_external_id() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlOrderRepository::new(pool);
        repo.save(order()).await.expect("save order");

        let by_external = repo.find_order("99210").await.expect("find").expect("order");
        assert_eq!(by_external.id, OrderId("ord_1".to_string()));
        assert_eq!(by_external.total, Decimal::from_str("59.90").expect("decimal"));
        assert_eq!(by_external.items.len(), 1);
        assert_eq!(by_external.items[0].quantity, 2);

        let by_internal = repo.find_order("ord_1").await.expect("find").expect("order");
        assert_eq!(by_internal, by_external);

        assert!(repo.find_order("00000").await.expect("find").is_none());
    }
}
