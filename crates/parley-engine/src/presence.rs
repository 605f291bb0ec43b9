use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::instrument;

use parley_core::errors::CoordinatorError;
use parley_core::events::ServerEvent;
use parley_core::ids::{ConversationId, UserId};
use parley_core::store::ConversationStore;

use crate::dispatch::{NotificationDispatcher, PushPolicy};

/// Ephemeral typing flags and last-seen timestamps. Nothing here is
/// persisted; a restart simply forgets everything.
pub struct TypingTracker {
    /// Typing flag keyed by (conversation, user). The value is the
    /// generation that set it, so an expiry timer from a superseded flag
    /// cannot clear a fresher one.
    states: Arc<DashMap<(ConversationId, UserId), u64>>,
    last_seen: Arc<DashMap<UserId, DateTime<Utc>>>,
    store: Arc<dyn ConversationStore>,
    dispatcher: Arc<NotificationDispatcher>,
    idle: Duration,
    generation: AtomicU64,
}

impl TypingTracker {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        dispatcher: Arc<NotificationDispatcher>,
        idle: Duration,
    ) -> Self {
        Self {
            states: Arc::new(DashMap::new()),
            last_seen: Arc::new(DashMap::new()),
            store,
            dispatcher,
            idle,
            generation: AtomicU64::new(0),
        }
    }

    /// Raise or clear a typing flag. A raised flag clears itself after the
    /// idle window, so a client that vanishes mid-typing never leaves the
    /// counterpart with a stuck indicator.
    #[instrument(skip(self), fields(conversation_id = %conversation_id, user_id = %user_id))]
    pub async fn set_typing(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
        is_typing: bool,
    ) -> Result<(), CoordinatorError> {
        let conversation = self.store.get_conversation(conversation_id).await?;
        if !conversation.is_participant(user_id) {
            return Err(CoordinatorError::NotParticipant);
        }
        let counterpart = match conversation.counterpart(user_id) {
            Some(c) => c.clone(),
            None => return Err(CoordinatorError::NotParticipant),
        };

        self.touch(user_id);
        let key = (conversation_id.clone(), user_id.clone());

        if is_typing {
            let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
            self.states.insert(key.clone(), generation);
            self.broadcast(&counterpart, conversation_id, user_id, true).await;
            self.spawn_expiry(key, generation, counterpart);
        } else if self.states.remove(&key).is_some() {
            self.broadcast(&counterpart, conversation_id, user_id, false).await;
        }
        Ok(())
    }

    fn spawn_expiry(&self, key: (ConversationId, UserId), generation: u64, counterpart: UserId) {
        let states = self.states.clone();
        let dispatcher = self.dispatcher.clone();
        let idle = self.idle;
        tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            // Only the generation that armed this timer may clear the flag.
            if states.remove_if(&key, |_, g| *g == generation).is_some() {
                let event = ServerEvent::TypingChanged {
                    conversation_id: key.0.clone(),
                    user_id: key.1.clone(),
                    is_typing: false,
                };
                dispatcher.deliver(&counterpart, &event, PushPolicy::Never).await;
            }
        });
    }

    async fn broadcast(
        &self,
        counterpart: &UserId,
        conversation_id: &ConversationId,
        user_id: &UserId,
        is_typing: bool,
    ) {
        let event = ServerEvent::TypingChanged {
            conversation_id: conversation_id.clone(),
            user_id: user_id.clone(),
            is_typing,
        };
        self.dispatcher.deliver(counterpart, &event, PushPolicy::Never).await;
    }

    pub fn is_typing(&self, conversation_id: &ConversationId, user_id: &UserId) -> bool {
        self.states
            .contains_key(&(conversation_id.clone(), user_id.clone()))
    }

    /// Record activity for a user. Called on every inbound frame.
    pub fn touch(&self, user_id: &UserId) {
        self.last_seen.insert(user_id.clone(), Utc::now());
    }

    pub fn last_seen(&self, user_id: &UserId) -> Option<DateTime<Utc>> {
        self.last_seen.get(user_id).map(|t| *t)
    }
}
