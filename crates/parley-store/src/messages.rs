use chrono::{DateTime, Utc};
use tracing::instrument;

use parley_core::ids::{ConversationId, MessageId, UserId};
use parley_core::model::{Message, MessageKind};

use crate::database::Database;
use crate::error::StoreError;
use crate::rows::{fmt_ts, parse_opt_ts, parse_ts};

pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a message. The id and server timestamp are already assigned
    /// by the delivery engine; the row is written verbatim.
    #[instrument(skip(self, message), fields(conversation_id = %message.conversation_id, message_id = %message.id))]
    pub fn append(&self, message: &Message) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, body, image_ref, kind, created_at, read_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    message.id.as_str(),
                    message.conversation_id.as_str(),
                    message.sender_id.as_str(),
                    message.body,
                    message.image_ref,
                    message.kind.to_string(),
                    fmt_ts(message.created_at),
                    message.read_at.map(fmt_ts),
                ],
            )?;
            Ok(())
        })
    }

    /// Page of messages strictly older than `before`, newest first.
    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    pub fn list_before(
        &self,
        conversation_id: &ConversationId,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Message>, StoreError> {
        self.db.with_conn(|conn| {
            let (sql, params): (&str, Vec<String>) = match before {
                Some(ts) => (
                    "SELECT id, conversation_id, sender_id, body, image_ref, kind, created_at, read_at
                     FROM messages
                     WHERE conversation_id = ?1 AND created_at < ?2
                     ORDER BY created_at DESC LIMIT ?3",
                    vec![
                        conversation_id.as_str().to_string(),
                        fmt_ts(ts),
                        limit.to_string(),
                    ],
                ),
                None => (
                    "SELECT id, conversation_id, sender_id, body, image_ref, kind, created_at, read_at
                     FROM messages
                     WHERE conversation_id = ?1
                     ORDER BY created_at DESC LIMIT ?2",
                    vec![conversation_id.as_str().to_string(), limit.to_string()],
                ),
            };

            let mut stmt = conn.prepare(sql)?;
            let params_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p as &dyn rusqlite::types::ToSql).collect();
            let mut rows = stmt.query(params_refs.as_slice())?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })
    }

    /// Mark everything the counterpart sent (up to `up_to`) as read.
    /// Returns the number of newly-read rows; already-read rows are left
    /// untouched, so repeated calls are no-ops.
    #[instrument(skip(self), fields(conversation_id = %conversation_id, reader_id = %reader_id))]
    pub fn mark_read(
        &self,
        conversation_id: &ConversationId,
        reader_id: &UserId,
        up_to: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET read_at = ?1
                 WHERE conversation_id = ?2
                   AND sender_id != ?3
                   AND read_at IS NULL
                   AND created_at <= ?1",
                rusqlite::params![fmt_ts(up_to), conversation_id.as_str(), reader_id.as_str()],
            )?;
            Ok(changed as u64)
        })
    }

    /// Unread count for a reader within one conversation.
    #[instrument(skip(self), fields(conversation_id = %conversation_id, reader_id = %reader_id))]
    pub fn unread_count(
        &self,
        conversation_id: &ConversationId,
        reader_id: &UserId,
    ) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE conversation_id = ?1 AND sender_id != ?2 AND read_at IS NULL",
                [conversation_id.as_str(), reader_id.as_str()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message, StoreError> {
    let kind: String = row.get(5)?;
    Ok(Message {
        id: MessageId::from_raw(row.get::<_, String>(0)?),
        conversation_id: ConversationId::from_raw(row.get::<_, String>(1)?),
        sender_id: UserId::from_raw(row.get::<_, String>(2)?),
        body: row.get(3)?,
        image_ref: row.get(4)?,
        kind: kind
            .parse::<MessageKind>()
            .map_err(StoreError::Serialization)?,
        created_at: parse_ts(&row.get::<_, String>(6)?)?,
        read_at: parse_opt_ts(row.get::<_, Option<String>>(7)?)?,
    })
}
