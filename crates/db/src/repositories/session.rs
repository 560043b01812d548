use sqlx::{Row, SqliteConnection};

use bazaar_core::domain::message::Message;
use bazaar_core::domain::session::{
    Session, SessionContext, SessionId, SessionKey, SessionStatus,
};

use super::message::{insert_message, stored_message_matches};
use super::{
    decode_err, decode_u32, format_timestamp, parse_optional_timestamp, parse_timestamp,
    RepositoryError, SessionCreation, SessionRepository, TurnOutcome, TurnRecord,
};
use crate::DbPool;

const SESSION_COLUMNS: &str = "id, session_key, marketplace, customer_id, customer_name,
    customer_email, customer_locale, context_json, status, message_count, is_escalated,
    escalated_at, escalation_reason, last_message_at, created_at, updated_at";

pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<Session, RepositoryError> {
    let status_raw: String = row.try_get("status").map_err(decode_err)?;
    let status = SessionStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("status: unknown value `{status_raw}`")))?;

    let context_raw: String = row.try_get("context_json").map_err(decode_err)?;
    let context = serde_json::from_str::<SessionContext>(&context_raw)
        .map_err(|error| RepositoryError::Decode(format!("context_json: {error}")))?;

    let last_message_at: String = row.try_get("last_message_at").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_err)?;

    Ok(Session {
        id: SessionId(row.try_get("id").map_err(decode_err)?),
        session_key: SessionKey(row.try_get("session_key").map_err(decode_err)?),
        marketplace: row.try_get("marketplace").map_err(decode_err)?,
        customer_id: row.try_get("customer_id").map_err(decode_err)?,
        customer_name: row.try_get("customer_name").map_err(decode_err)?,
        customer_email: row.try_get("customer_email").map_err(decode_err)?,
        customer_locale: row.try_get("customer_locale").map_err(decode_err)?,
        context,
        status,
        message_count: decode_u32(
            "message_count",
            row.try_get("message_count").map_err(decode_err)?,
        )?,
        is_escalated: row.try_get("is_escalated").map_err(decode_err)?,
        escalated_at: parse_optional_timestamp(
            "escalated_at",
            row.try_get("escalated_at").map_err(decode_err)?,
        )?,
        escalation_reason: row.try_get("escalation_reason").map_err(decode_err)?,
        last_message_at: parse_timestamp("last_message_at", &last_message_at)?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

fn encode_context(context: &SessionContext) -> Result<String, RepositoryError> {
    serde_json::to_string(context)
        .map_err(|error| RepositoryError::Decode(format!("context_json: {error}")))
}

async fn fetch_session(
    conn: &mut SqliteConnection,
    id: &SessionId,
) -> Result<Option<Session>, RepositoryError> {
    let row = sqlx::query(&format!("SELECT {SESSION_COLUMNS} FROM support_session WHERE id = ?"))
        .bind(&id.0)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(row_to_session).transpose()
}

#[async_trait::async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        fetch_session(&mut conn, id).await
    }

    async fn find_open_by_key(
        &self,
        key: &SessionKey,
    ) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM support_session
             WHERE session_key = ? AND status IN ('active', 'waiting')
             ORDER BY created_at DESC
             LIMIT 1"
        ))
        .bind(&key.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_session).transpose()
    }

    async fn create_with_welcome(
        &self,
        session: Session,
        welcome: Message,
    ) -> Result<SessionCreation, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO support_session (id, session_key, marketplace, customer_id, customer_name,
                                          customer_email, customer_locale, context_json, status,
                                          message_count, is_escalated, escalated_at,
                                          escalation_reason, last_message_at, created_at,
                                          updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.id.0)
        .bind(&session.session_key.0)
        .bind(&session.marketplace)
        .bind(&session.customer_id)
        .bind(&session.customer_name)
        .bind(&session.customer_email)
        .bind(&session.customer_locale)
        .bind(encode_context(&session.context)?)
        .bind(session.status.as_str())
        .bind(i64::from(session.message_count))
        .bind(session.is_escalated)
        .bind(session.escalated_at.map(format_timestamp))
        .bind(&session.escalation_reason)
        .bind(format_timestamp(session.last_message_at))
        .bind(format_timestamp(session.created_at))
        .bind(format_timestamp(session.updated_at))
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(error)) if error.is_unique_violation() => {
                tx.rollback().await?;
                return match self.find_open_by_key(&session.session_key).await? {
                    Some(existing) => Ok(SessionCreation::Existing(existing)),
                    None => Err(RepositoryError::Conflict(format!(
                        "session key `{}` collided with a row that is no longer open",
                        session.session_key.0
                    ))),
                };
            }
            Err(error) => return Err(error.into()),
        }

        insert_message(&mut tx, &welcome).await?;
        tx.commit().await?;

        Ok(SessionCreation::Created(session))
    }

    async fn record_turn(&self, turn: TurnRecord) -> Result<TurnOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let context_json = turn.context.as_ref().map(encode_context).transpose()?;
        let updated = sqlx::query(
            "UPDATE support_session
             SET message_count = ?,
                 last_message_at = ?,
                 updated_at = ?,
                 context_json = COALESCE(?, context_json),
                 status = CASE
                     WHEN ? IS NOT NULL THEN 'escalated'
                     WHEN status = 'waiting' THEN 'active'
                     ELSE status
                 END,
                 is_escalated = CASE WHEN ? IS NOT NULL THEN 1 ELSE is_escalated END,
                 escalated_at = COALESCE(?, escalated_at),
                 escalation_reason = COALESCE(?, escalation_reason)
             WHERE id = ? AND message_count = ?",
        )
        .bind(i64::from(turn.next_message_count()))
        .bind(format_timestamp(turn.recorded_at))
        .bind(format_timestamp(turn.recorded_at))
        .bind(context_json)
        .bind(turn.escalation.as_ref().map(|mark| mark.reason.as_str()))
        .bind(turn.escalation.as_ref().map(|mark| mark.reason.as_str()))
        .bind(turn.escalation.as_ref().map(|mark| format_timestamp(mark.at)))
        .bind(turn.escalation.as_ref().map(|mark| mark.reason.as_str()))
        .bind(&turn.session_id.0)
        .bind(i64::from(turn.expected_message_count))
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let mut already_recorded = !turn.messages.is_empty();
            for message in &turn.messages {
                if !stored_message_matches(&mut tx, message).await? {
                    already_recorded = false;
                    break;
                }
            }
            let current = fetch_session(&mut tx, &turn.session_id).await?;
            tx.rollback().await?;

            return match current {
                Some(session) if already_recorded => Ok(TurnOutcome::AlreadyRecorded(session)),
                Some(session) => Err(RepositoryError::Conflict(format!(
                    "session `{}` message_count is {} but the turn expected {}",
                    session.id.0, session.message_count, turn.expected_message_count
                ))),
                None => Err(RepositoryError::Conflict(format!(
                    "session `{}` does not exist",
                    turn.session_id.0
                ))),
            };
        }

        for message in &turn.messages {
            insert_message(&mut tx, message).await?;
        }

        let stored = fetch_session(&mut tx, &turn.session_id).await?.ok_or_else(|| {
            RepositoryError::Conflict(format!("session `{}` vanished mid-turn", turn.session_id.0))
        })?;
        tx.commit().await?;

        Ok(TurnOutcome::Recorded(stored))
    }

    async fn save_status(&self, session: &Session) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE support_session
             SET status = ?, is_escalated = ?, escalated_at = ?, escalation_reason = ?,
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(session.status.as_str())
        .bind(session.is_escalated)
        .bind(session.escalated_at.map(format_timestamp))
        .bind(&session.escalation_reason)
        .bind(format_timestamp(session.updated_at))
        .bind(&session.id.0)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Err(RepositoryError::Conflict(format!(
                "session `{}` does not exist",
                session.id.0
            ))),
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(error)) if error.is_unique_violation() => {
                Err(RepositoryError::Conflict(format!(
                    "another open session already uses key `{}`",
                    session.session_key.0
                )))
            }
            Err(error) => Err(error.into()),
        }
    }
}
