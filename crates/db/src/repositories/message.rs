use sqlx::{Row, SqliteConnection};

use bazaar_core::domain::intent::{Entities, Intent};
use bazaar_core::domain::message::{Message, MessageId, MessageRole};
use bazaar_core::domain::session::SessionId;

use super::{decode_err, decode_u32, format_timestamp, parse_timestamp, MessageRepository, RepositoryError};
use crate::DbPool;

const MESSAGE_COLUMNS: &str = "id, session_id, sequence, role, content, intent, confidence,
    entities_json, referenced_order_id, referenced_product_id, is_auto_reply, created_at";

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub(crate) async fn insert_message(
    conn: &mut SqliteConnection,
    message: &Message,
) -> Result<(), RepositoryError> {
    let entities_json = message
        .entities
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|error| RepositoryError::Decode(format!("entities_json: {error}")))?;

    sqlx::query(
        "INSERT INTO support_message (id, session_id, sequence, role, content, intent, confidence,
                                      entities_json, referenced_order_id, referenced_product_id,
                                      is_auto_reply, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&message.id.0)
    .bind(&message.session_id.0)
    .bind(i64::from(message.sequence))
    .bind(message.role.as_str())
    .bind(&message.content)
    .bind(message.intent.map(|intent| intent.as_str()))
    .bind(message.confidence)
    .bind(entities_json)
    .bind(&message.referenced_order_id)
    .bind(&message.referenced_product_id)
    .bind(message.is_auto_reply)
    .bind(format_timestamp(message.created_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// True when a stored row at `message.sequence` has the same role and content.
pub(crate) async fn stored_message_matches(
    conn: &mut SqliteConnection,
    message: &Message,
) -> Result<bool, RepositoryError> {
    let row = sqlx::query(
        "SELECT role, content FROM support_message WHERE session_id = ? AND sequence = ?",
    )
    .bind(&message.session_id.0)
    .bind(i64::from(message.sequence))
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(false);
    };
    let role: String = row.try_get("role").map_err(decode_err)?;
    let content: String = row.try_get("content").map_err(decode_err)?;
    Ok(MessageRole::parse(&role) == Some(message.role) && content == message.content)
}

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, RepositoryError> {
    let role_raw: String = row.try_get("role").map_err(decode_err)?;
    let role = MessageRole::parse(&role_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("role: unknown value `{role_raw}`")))?;

    let intent = row
        .try_get::<Option<String>, _>("intent")
        .map_err(decode_err)?
        .map(|raw| {
            Intent::parse(&raw)
                .ok_or_else(|| RepositoryError::Decode(format!("intent: unknown value `{raw}`")))
        })
        .transpose()?;

    let entities = row
        .try_get::<Option<String>, _>("entities_json")
        .map_err(decode_err)?
        .map(|raw| serde_json::from_str::<Entities>(&raw))
        .transpose()
        .map_err(|error| RepositoryError::Decode(format!("entities_json: {error}")))?;

    let created_at: String = row.try_get("created_at").map_err(decode_err)?;

    Ok(Message {
        id: MessageId(row.try_get("id").map_err(decode_err)?),
        session_id: SessionId(row.try_get("session_id").map_err(decode_err)?),
        sequence: decode_u32("sequence", row.try_get("sequence").map_err(decode_err)?)?,
        role,
        content: row.try_get("content").map_err(decode_err)?,
        intent,
        confidence: row.try_get("confidence").map_err(decode_err)?,
        entities,
        referenced_order_id: row.try_get("referenced_order_id").map_err(decode_err)?,
        referenced_product_id: row.try_get("referenced_product_id").map_err(decode_err)?,
        is_auto_reply: row.try_get("is_auto_reply").map_err(decode_err)?,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

#[async_trait::async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn recent_for_session(
        &self,
        session_id: &SessionId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM support_message
             WHERE session_id = ?
             ORDER BY created_at DESC, sequence DESC
             LIMIT ?"
        ))
        .bind(&session_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_message).collect()
    }

    async fn list_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM support_message
             WHERE session_id = ?
             ORDER BY created_at ASC, sequence ASC"
        ))
        .bind(&session_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_message).collect()
    }
}
