use chrono::Utc;
use sqlx::Row;

use bazaar_core::domain::product::{ProductId, ProductSummary};

use super::order::parse_decimal;
use super::{decode_err, decode_u32, format_timestamp, ProductRepository, RepositoryError};
use crate::DbPool;

pub struct SqlProductRepository {
    pool: DbPool,
}

impl SqlProductRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_product(row: &sqlx::sqlite::SqliteRow) -> Result<ProductSummary, RepositoryError> {
    let price: String = row.try_get("price").map_err(decode_err)?;
    let stock: Option<i64> = row.try_get("stock_quantity").map_err(decode_err)?;

    Ok(ProductSummary {
        id: ProductId(row.try_get("id").map_err(decode_err)?),
        sku: row.try_get("sku").map_err(decode_err)?,
        title: row.try_get("title").map_err(decode_err)?,
        description: row.try_get("description").map_err(decode_err)?,
        price: parse_decimal("price", &price)?,
        currency: row.try_get("currency").map_err(decode_err)?,
        stock_quantity: stock.map(|value| decode_u32("stock_quantity", value)).transpose()?,
        active: row.try_get("active").map_err(decode_err)?,
    })
}

#[async_trait::async_trait]
impl ProductRepository for SqlProductRepository {
    async fn find_product(&self, id: &ProductId) -> Result<Option<ProductSummary>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, sku, title, description, price, currency, stock_quantity, active
             FROM product WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_product).transpose()
    }

    async fn save(&self, product: ProductSummary) -> Result<(), RepositoryError> {
        let now = format_timestamp(Utc::now());
        sqlx::query(
            "INSERT INTO product (id, sku, title, description, price, currency, stock_quantity,
                                  active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 sku = excluded.sku,
                 title = excluded.title,
                 description = excluded.description,
                 price = excluded.price,
                 currency = excluded.currency,
                 stock_quantity = excluded.stock_quantity,
                 active = excluded.active,
                 updated_at = excluded.updated_at",
        )
        .bind(&product.id.0)
        .bind(&product.sku)
        .bind(&product.title)
        .bind(&product.description)
        .bind(product.price.to_string())
        .bind(&product.currency)
        .bind(product.stock_quantity.map(i64::from))
        .bind(product.active)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
