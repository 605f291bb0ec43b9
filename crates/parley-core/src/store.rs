use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::CoordinatorError;
use crate::ids::{ConversationId, ShopId, UserId};
use crate::model::{Conversation, ConversationSummary, Message};

/// Adapter over the resource layer holding conversations and
/// messages-at-rest. The coordinator reads and appends; it never deletes.
///
/// Implementations must not retry internally; callers decide on retry.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get_conversation(&self, id: &ConversationId) -> Result<Conversation, CoordinatorError>;

    /// Lazily create the conversation for a (customer, seller, shop)
    /// triple, or return the existing one.
    async fn get_or_create_conversation(
        &self,
        customer_id: &UserId,
        seller_id: &UserId,
        shop_id: &ShopId,
    ) -> Result<Conversation, CoordinatorError>;

    /// Every conversation the user takes part in, most recent activity
    /// first, each with the user's unread count. Backs the inbox view.
    async fn list_conversations(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<ConversationSummary>, CoordinatorError>;

    /// Persist a fully-formed message. The caller has already assigned the
    /// id and the server timestamp; the store also refreshes the owning
    /// conversation's `last_message_*` fields.
    async fn create_message(&self, message: &Message) -> Result<(), CoordinatorError>;

    /// Page of messages strictly older than `before` (newest first).
    async fn list_messages(
        &self,
        conversation_id: &ConversationId,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Message>, CoordinatorError>;

    /// Mark all messages authored by the other participant as read up to
    /// `up_to`. Returns the number of newly-read messages; idempotent.
    async fn mark_read(
        &self,
        conversation_id: &ConversationId,
        reader_id: &UserId,
        up_to: DateTime<Utc>,
    ) -> Result<u64, CoordinatorError>;
}
