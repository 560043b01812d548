use sqlx::Row;

use bazaar_core::domain::support_config::SupportConfig;

use super::{
    decode_err, decode_u32, format_timestamp, parse_timestamp, RepositoryError,
    SupportConfigRepository,
};
use crate::DbPool;

pub struct SqlSupportConfigRepository {
    pool: DbPool,
}

impl SqlSupportConfigRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode_list(column: &str, raw: &str) -> Result<Vec<String>, RepositoryError> {
    serde_json::from_str(raw).map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}

fn encode_list(column: &str, values: &[String]) -> Result<String, RepositoryError> {
    serde_json::to_string(values)
        .map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}

fn row_to_config(row: &sqlx::sqlite::SqliteRow) -> Result<SupportConfig, RepositoryError> {
    let keywords: String = row.try_get("escalation_keywords_json").map_err(decode_err)?;
    let locales: String = row.try_get("supported_locales_json").map_err(decode_err)?;
    let threshold: Option<i64> = row.try_get("auto_escalate_after_messages").map_err(decode_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_err)?;
    let temperature: f64 = row.try_get("temperature").map_err(decode_err)?;

    Ok(SupportConfig {
        marketplace: row.try_get("marketplace").map_err(decode_err)?,
        model: row.try_get("model").map_err(decode_err)?,
        temperature: temperature as f32,
        max_tokens: decode_u32("max_tokens", row.try_get("max_tokens").map_err(decode_err)?)?,
        system_prompt: row.try_get("system_prompt").map_err(decode_err)?,
        escalation_keywords: decode_list("escalation_keywords_json", &keywords)?,
        auto_escalate_negative_sentiment: row
            .try_get("auto_escalate_negative_sentiment")
            .map_err(decode_err)?,
        auto_escalate_after_messages: threshold
            .map(|value| decode_u32("auto_escalate_after_messages", value))
            .transpose()?,
        supported_locales: decode_list("supported_locales_json", &locales)?,
        is_active: row.try_get("is_active").map_err(decode_err)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait::async_trait]
impl SupportConfigRepository for SqlSupportConfigRepository {
    async fn find_active(
        &self,
        marketplace: &str,
    ) -> Result<Option<SupportConfig>, RepositoryError> {
        let row = sqlx::query(
            "SELECT marketplace, model, temperature, max_tokens, system_prompt,
                    escalation_keywords_json, auto_escalate_negative_sentiment,
                    auto_escalate_after_messages, supported_locales_json, is_active, updated_at
             FROM support_config
             WHERE marketplace = ? AND is_active = 1",
        )
        .bind(marketplace)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_config).transpose()
    }

    async fn save(&self, config: SupportConfig) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO support_config (marketplace, model, temperature, max_tokens, system_prompt,
                                         escalation_keywords_json,
                                         auto_escalate_negative_sentiment,
                                         auto_escalate_after_messages, supported_locales_json,
                                         is_active, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(marketplace) DO UPDATE SET
                 model = excluded.model,
                 temperature = excluded.temperature,
                 max_tokens = excluded.max_tokens,
                 system_prompt = excluded.system_prompt,
                 escalation_keywords_json = excluded.escalation_keywords_json,
                 auto_escalate_negative_sentiment = excluded.auto_escalate_negative_sentiment,
                 auto_escalate_after_messages = excluded.auto_escalate_after_messages,
                 supported_locales_json = excluded.supported_locales_json,
                 is_active = excluded.is_active,
                 updated_at = excluded.updated_at",
        )
        .bind(&config.marketplace)
        .bind(&config.model)
        .bind(f64::from(config.temperature))
        .bind(i64::from(config.max_tokens))
        .bind(&config.system_prompt)
        .bind(encode_list("escalation_keywords_json", &config.escalation_keywords)?)
        .bind(config.auto_escalate_negative_sentiment)
        .bind(config.auto_escalate_after_messages.map(i64::from))
        .bind(encode_list("supported_locales_json", &config.supported_locales)?)
        .bind(config.is_active)
        .bind(format_timestamp(config.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bazaar_core::domain::support_config::SupportConfig;

    use super::SqlSupportConfigRepository;
    use crate::repositories::SupportConfigRepository;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn sql_support_config_round_trips_and_hides_inactive_rows() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlSupportConfigRepository::new(pool);

        let mut config = SupportConfig::for_marketplace("ebay");
        config.auto_escalate_after_messages = Some(5);
        config.escalation_keywords = vec!["lawyer".to_string()];
        repo.save(config.clone()).await.expect("save");

        let found = repo.find_active("ebay").await.expect("find").expect("active row");
        assert_eq!(found.auto_escalate_after_messages, Some(5));
        assert_eq!(found.escalation_keywords, vec!["lawyer".to_string()]);
        assert!((found.temperature - config.temperature).abs() < f32::EPSILON);

        config.is_active = false;
        repo.save(config).await.expect("deactivate");
        assert!(repo.find_active("ebay").await.expect("find").is_none());
        assert!(repo.find_active("default").await.expect("find default").is_none());
    }
}
