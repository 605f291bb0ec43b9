use async_trait::async_trait;
use chrono::{DateTime, Utc};

use parley_core::errors::CoordinatorError;
use parley_core::ids::{ConversationId, ShopId, UserId};
use parley_core::model::{Conversation, ConversationSummary, Message};
use parley_core::store::ConversationStore;

use crate::conversations::ConversationRepo;
use crate::database::Database;
use crate::error::StoreError;
use crate::messages::MessageRepo;

/// `ConversationStore` backed by the SQLite repos. This is the concrete
/// Conversation Store Adapter handed to the delivery engine.
pub struct SqliteConversationStore {
    conversations: ConversationRepo,
    messages: MessageRepo,
}

impl SqliteConversationStore {
    pub fn new(db: Database) -> Self {
        Self {
            conversations: ConversationRepo::new(db.clone()),
            messages: MessageRepo::new(db),
        }
    }
}

fn map_err(e: StoreError) -> CoordinatorError {
    match e {
        StoreError::NotFound(what) => CoordinatorError::ConversationNotFound(what),
        other => CoordinatorError::PersistenceFailed(other.to_string()),
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn get_conversation(&self, id: &ConversationId) -> Result<Conversation, CoordinatorError> {
        self.conversations.get(id).map_err(map_err)
    }

    async fn get_or_create_conversation(
        &self,
        customer_id: &UserId,
        seller_id: &UserId,
        shop_id: &ShopId,
    ) -> Result<Conversation, CoordinatorError> {
        self.conversations
            .get_or_create(customer_id, seller_id, shop_id)
            .map_err(map_err)
    }

    async fn list_conversations(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<ConversationSummary>, CoordinatorError> {
        let conversations = self.conversations.list_for_user(user_id).map_err(map_err)?;
        let mut summaries = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let unread_count = self
                .messages
                .unread_count(&conversation.id, user_id)
                .map_err(map_err)?;
            summaries.push(ConversationSummary {
                conversation,
                unread_count,
            });
        }
        Ok(summaries)
    }

    async fn create_message(&self, message: &Message) -> Result<(), CoordinatorError> {
        self.messages.append(message).map_err(map_err)?;
        // Preview refresh is part of the append; a failure here leaves the
        // message persisted, which is the lesser evil.
        if let Err(e) = self.conversations.touch_last_message(
            &message.conversation_id,
            message.created_at,
            &message.preview(),
        ) {
            tracing::warn!(
                conversation_id = %message.conversation_id,
                error = %e,
                "failed to refresh conversation preview"
            );
        }
        Ok(())
    }

    async fn list_messages(
        &self,
        conversation_id: &ConversationId,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Message>, CoordinatorError> {
        self.messages
            .list_before(conversation_id, before, limit)
            .map_err(map_err)
    }

    async fn mark_read(
        &self,
        conversation_id: &ConversationId,
        reader_id: &UserId,
        up_to: DateTime<Utc>,
    ) -> Result<u64, CoordinatorError> {
        self.messages
            .mark_read(conversation_id, reader_id, up_to)
            .map_err(map_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::ids::MessageId;
    use parley_core::model::MessageKind;

    fn store() -> SqliteConversationStore {
        SqliteConversationStore::new(Database::in_memory().unwrap())
    }

    #[tokio::test]
    async fn unknown_conversation_maps_to_domain_error() {
        let store = store();
        let err = store
            .get_conversation(&ConversationId::from_raw("conv_missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::ConversationNotFound(_)));
    }

    #[tokio::test]
    async fn create_message_refreshes_preview() {
        let store = store();
        let conv = store
            .get_or_create_conversation(
                &UserId::from_raw("user_c"),
                &UserId::from_raw("user_s"),
                &ShopId::from_raw("shop_1"),
            )
            .await
            .unwrap();

        let msg = Message {
            id: MessageId::new(),
            conversation_id: conv.id.clone(),
            sender_id: UserId::from_raw("user_c"),
            body: "is this still available?".into(),
            image_ref: None,
            kind: MessageKind::Text,
            created_at: Utc::now(),
            read_at: None,
        };
        store.create_message(&msg).await.unwrap();

        let reloaded = store.get_conversation(&conv.id).await.unwrap();
        assert_eq!(
            reloaded.last_message_preview.as_deref(),
            Some("is this still available?")
        );
        assert!(reloaded.last_message_at.is_some());
    }

    #[tokio::test]
    async fn list_conversations_carries_unread_counts() {
        let store = store();
        let customer = UserId::from_raw("user_c");
        let seller = UserId::from_raw("user_s");
        let conv = store
            .get_or_create_conversation(&customer, &seller, &ShopId::from_raw("shop_1"))
            .await
            .unwrap();

        let msg = Message {
            id: MessageId::new(),
            conversation_id: conv.id.clone(),
            sender_id: seller.clone(),
            body: "back in stock".into(),
            image_ref: None,
            kind: MessageKind::Text,
            created_at: Utc::now(),
            read_at: None,
        };
        store.create_message(&msg).await.unwrap();

        // Unread only on the side that has not read it.
        let inbox = store.list_conversations(&customer).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].unread_count, 1);
        assert_eq!(store.list_conversations(&seller).await.unwrap()[0].unread_count, 0);

        store
            .mark_read(&conv.id, &customer, Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(store.list_conversations(&customer).await.unwrap()[0].unread_count, 0);
    }
}
