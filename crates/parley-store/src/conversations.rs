use chrono::Utc;
use tracing::instrument;

use parley_core::ids::{ConversationId, ShopId, UserId};
use parley_core::model::Conversation;

use crate::database::Database;
use crate::error::StoreError;
use crate::rows::{fmt_ts, parse_opt_ts, parse_ts};

pub struct ConversationRepo {
    db: Database,
}

impl ConversationRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Get a conversation by ID.
    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn get(&self, id: &ConversationId) -> Result<Conversation, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, customer_id, seller_id, shop_id, last_message_at,
                        last_message_preview, created_at
                 FROM conversations WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_conversation(row),
                None => Err(StoreError::NotFound(format!("conversation {id}"))),
            }
        })
    }

    /// Fetch the conversation for a (customer, seller, shop) triple,
    /// creating it on first contact.
    #[instrument(skip(self), fields(customer_id = %customer_id, seller_id = %seller_id, shop_id = %shop_id))]
    pub fn get_or_create(
        &self,
        customer_id: &UserId,
        seller_id: &UserId,
        shop_id: &ShopId,
    ) -> Result<Conversation, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, customer_id, seller_id, shop_id, last_message_at,
                        last_message_preview, created_at
                 FROM conversations
                 WHERE customer_id = ?1 AND seller_id = ?2 AND shop_id = ?3",
            )?;
            let mut rows =
                stmt.query([customer_id.as_str(), seller_id.as_str(), shop_id.as_str()])?;
            if let Some(row) = rows.next()? {
                return row_to_conversation(row);
            }
            drop(rows);
            drop(stmt);

            let id = ConversationId::new();
            let now = Utc::now();
            conn.execute(
                "INSERT INTO conversations (id, customer_id, seller_id, shop_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    id.as_str(),
                    customer_id.as_str(),
                    seller_id.as_str(),
                    shop_id.as_str(),
                    fmt_ts(now),
                ],
            )?;

            Ok(Conversation {
                id,
                customer_id: customer_id.clone(),
                seller_id: seller_id.clone(),
                shop_id: shop_id.clone(),
                last_message_at: None,
                last_message_preview: None,
                created_at: now,
            })
        })
    }

    /// Refresh `last_message_*` after a message append.
    #[instrument(skip(self, preview), fields(conversation_id = %id))]
    pub fn touch_last_message(
        &self,
        id: &ConversationId,
        at: chrono::DateTime<Utc>,
        preview: &str,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE conversations SET last_message_at = ?1, last_message_preview = ?2
                 WHERE id = ?3",
                rusqlite::params![fmt_ts(at), preview, id.as_str()],
            )?;
            Ok(())
        })
    }

    /// All conversations a user takes part in, most recent activity first.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Conversation>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, customer_id, seller_id, shop_id, last_message_at,
                        last_message_preview, created_at
                 FROM conversations
                 WHERE customer_id = ?1 OR seller_id = ?1
                 ORDER BY COALESCE(last_message_at, created_at) DESC",
            )?;
            let mut rows = stmt.query([user_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_conversation(row)?);
            }
            Ok(results)
        })
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> Result<Conversation, StoreError> {
    Ok(Conversation {
        id: ConversationId::from_raw(row.get::<_, String>(0)?),
        customer_id: UserId::from_raw(row.get::<_, String>(1)?),
        seller_id: UserId::from_raw(row.get::<_, String>(2)?),
        shop_id: ShopId::from_raw(row.get::<_, String>(3)?),
        last_message_at: parse_opt_ts(row.get::<_, Option<String>>(4)?)?,
        last_message_preview: row.get(5)?,
        created_at: parse_ts(&row.get::<_, String>(6)?)?,
    })
}
