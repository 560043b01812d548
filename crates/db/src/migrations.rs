use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::{connect_with_settings, migrations::MIGRATOR};

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "support_session",
        "support_message",
        "support_config",
        "marketplace_order",
        "marketplace_order_item",
        "product",
        "idx_support_session_open_key",
        "idx_support_session_marketplace",
        "idx_support_message_session_created",
        "idx_marketplace_order_external_id",
        "idx_marketplace_order_item_order_id",
    ];

    async fn table_exists(pool: &sqlx::SqlitePool, name: &str) -> bool {
        sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(name)
        .fetch_one(pool)
        .await
        .expect("query sqlite_master")
        .get::<i64, _>("count")
            == 1
    }

    #[tokio::test]
    async fn migrations_create_baseline_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for table in [
            "support_session",
            "support_message",
            "support_config",
            "marketplace_order",
            "marketplace_order_item",
            "product",
        ] {
            assert!(table_exists(&pool, table).await, "table `{table}` should exist");
        }
    }

    #[tokio::test]
    async fn open_session_key_is_unique_only_while_open() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let insert = "INSERT INTO support_session
            (id, session_key, marketplace, status, last_message_at, created_at, updated_at)
            VALUES (?, 'amazon_C-1', 'amazon', ?, '2026-01-01T00:00:00.000000Z',
                    '2026-01-01T00:00:00.000000Z', '2026-01-01T00:00:00.000000Z')";

        sqlx::query(insert).bind("S-1").bind("resolved").execute(&pool).await.expect("resolved");
        sqlx::query(insert).bind("S-2").bind("active").execute(&pool).await.expect("active");
        let duplicate = sqlx::query(insert).bind("S-3").bind("waiting").execute(&pool).await;

        match duplicate {
            Err(sqlx::Error::Database(error)) => assert!(error.is_unique_violation()),
            other => panic!("expected unique violation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn migrations_are_reversible() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        assert!(!table_exists(&pool, "support_session").await);
        assert!(!table_exists(&pool, "support_message").await);
    }

    #[tokio::test]
    async fn migrations_up_down_up_preserves_schema_signature() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let initial_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            initial_signature.len(),
            MANAGED_SCHEMA_OBJECTS.len(),
            "initial migration pass should create all managed schema objects",
        );

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");
        assert!(
            managed_schema_signature(&pool).await.is_empty(),
            "managed schema objects should be removed after full undo",
        );

        run_pending(&pool).await.expect("re-run migrations");
        assert_eq!(
            managed_schema_signature(&pool).await,
            initial_signature,
            "up/down/up should preserve migration-managed schema signature",
        );
    }

    async fn managed_schema_signature(pool: &sqlx::SqlitePool) -> Vec<(String, String, String)> {
        let mut signature: Vec<(String, String, String)> = sqlx::query(
            "SELECT type, name, IFNULL(sql, '') AS sql
             FROM sqlite_master
             WHERE type IN ('table', 'index')",
        )
        .fetch_all(pool)
        .await
        .expect("load schema objects")
        .into_iter()
        .filter_map(|row| {
            let name = row.get::<String, _>("name");
            if MANAGED_SCHEMA_OBJECTS.contains(&name.as_str()) {
                Some((row.get::<String, _>("type"), name, row.get::<String, _>("sql")))
            } else {
                None
            }
        })
        .collect();
        signature.sort();
        signature
    }
}
