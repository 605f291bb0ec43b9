use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::instrument;

use parley_core::errors::CoordinatorError;
use parley_core::events::ServerEvent;
use parley_core::ids::{CallId, ConversationId, UserId};
use parley_core::model::{MessageKind, Role};
use parley_core::store::ConversationStore;

use crate::delivery::DeliveryEngine;
use crate::dispatch::{NotificationDispatcher, PushPolicy};

/// Lifecycle of one call attempt. Terminal states never transition again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallState {
    Requested,
    Ringing,
    Active,
    Ended,
    Rejected,
    TimedOut,
    Cancelled,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallState::Ended | CallState::Rejected | CallState::TimedOut | CallState::Cancelled
        )
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallState::Requested => "requested",
            CallState::Ringing => "ringing",
            CallState::Active => "active",
            CallState::Ended => "ended",
            CallState::Rejected => "rejected",
            CallState::TimedOut => "timed_out",
            CallState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallKind {
    Video,
}

struct CallSession {
    conversation_id: ConversationId,
    caller_id: UserId,
    callee_id: UserId,
    #[allow(dead_code)]
    kind: CallKind,
    state: CallState,
    answered_at: Option<DateTime<Utc>>,
    /// Bumped on every transition so a stale ring timer can recognize it
    /// lost the race.
    generation: u64,
}

/// Result of a call request. `callee_reachable` is informational; an
/// unreachable callee still leaves the call ringing until timeout.
#[derive(Clone, Debug)]
pub struct RequestOutcome {
    pub session_id: CallId,
    pub callee_reachable: bool,
}

/// Owns every in-flight call and enforces one active call per
/// conversation. Each session is linearized behind its own async mutex;
/// the per-conversation claim is taken atomically through the map entry.
pub struct CallSessionManager {
    sessions: Arc<DashMap<CallId, Arc<Mutex<CallSession>>>>,
    active: Arc<DashMap<ConversationId, CallId>>,
    store: Arc<dyn ConversationStore>,
    dispatcher: Arc<NotificationDispatcher>,
    delivery: Arc<DeliveryEngine>,
    ring_timeout: Duration,
    session_linger: Duration,
}

impl CallSessionManager {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        dispatcher: Arc<NotificationDispatcher>,
        delivery: Arc<DeliveryEngine>,
        ring_timeout: Duration,
        session_linger: Duration,
    ) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            active: Arc::new(DashMap::new()),
            store,
            dispatcher,
            delivery,
            ring_timeout,
            session_linger,
        }
    }

    /// Start a call. Only the customer may initiate; one call per
    /// conversation at a time.
    #[instrument(skip(self), fields(conversation_id = %conversation_id, caller_id = %caller_id))]
    pub async fn request_call(
        &self,
        conversation_id: &ConversationId,
        caller_id: &UserId,
    ) -> Result<RequestOutcome, CoordinatorError> {
        let conversation = self.store.get_conversation(conversation_id).await?;
        match conversation.role_of(caller_id) {
            None => return Err(CoordinatorError::NotParticipant),
            Some(Role::Seller) => return Err(CoordinatorError::RoleNotPermitted),
            Some(Role::Customer) => {}
        }
        let callee_id = match conversation.counterpart(caller_id) {
            Some(c) => c.clone(),
            None => return Err(CoordinatorError::NotParticipant),
        };

        let call_id = CallId::new();
        match self.active.entry(conversation_id.clone()) {
            Entry::Occupied(_) => return Err(CoordinatorError::Conflict),
            Entry::Vacant(slot) => {
                slot.insert(call_id.clone());
            }
        }

        let session = Arc::new(Mutex::new(CallSession {
            conversation_id: conversation_id.clone(),
            caller_id: caller_id.clone(),
            callee_id: callee_id.clone(),
            kind: CallKind::Video,
            state: CallState::Requested,
            answered_at: None,
            generation: 0,
        }));
        self.sessions.insert(call_id.clone(), session.clone());

        let ringing = ServerEvent::CallRinging {
            session_id: call_id.clone(),
            conversation_id: conversation_id.clone(),
            caller_id: caller_id.clone(),
        };
        // Always push: a backgrounded app must still ring.
        let delivered = self
            .dispatcher
            .deliver(&callee_id, &ringing, PushPolicy::Always)
            .await;

        let timer_generation = {
            let mut s = session.lock().await;
            s.state = CallState::Ringing;
            s.generation += 1;
            s.generation
        };

        self.spawn_ring_timer(call_id.clone(), session, timer_generation);

        tracing::info!(
            call_id = %call_id,
            callee_reachable = delivered > 0,
            "call ringing"
        );
        Ok(RequestOutcome {
            session_id: call_id,
            callee_reachable: delivered > 0,
        })
    }

    fn spawn_ring_timer(
        &self,
        call_id: CallId,
        session: Arc<Mutex<CallSession>>,
        generation: u64,
    ) {
        let active = self.active.clone();
        let dispatcher = self.dispatcher.clone();
        let timeout = self.ring_timeout;
        let sessions = self.sessions.clone();
        let linger = self.session_linger;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let (caller_id, callee_id) = {
                let mut s = session.lock().await;
                // An answer, reject, or cancel already won.
                if s.state != CallState::Ringing || s.generation != generation {
                    return;
                }
                s.state = CallState::TimedOut;
                s.generation += 1;
                active.remove_if(&s.conversation_id, |_, id| *id == call_id);
                (s.caller_id.clone(), s.callee_id.clone())
            };
            schedule_eviction(sessions, call_id.clone(), linger);

            tracing::info!(call_id = %call_id, "call ring timed out");
            let event = ServerEvent::CallTimedOut {
                session_id: call_id,
            };
            // Missed-call notice for the callee even when offline.
            dispatcher.deliver(&callee_id, &event, PushPolicy::Always).await;
            dispatcher.deliver(&caller_id, &event, PushPolicy::Never).await;
        });
    }

    fn session(&self, call_id: &CallId) -> Result<Arc<Mutex<CallSession>>, CoordinatorError> {
        self.sessions
            .get(call_id)
            .map(|s| s.clone())
            .ok_or_else(|| CoordinatorError::CallNotFound(call_id.to_string()))
    }

    /// Callee answers. Ringing -> Active, plus a `call_started` system
    /// message in the conversation transcript.
    #[instrument(skip(self), fields(call_id = %call_id, user_id = %user_id))]
    pub async fn accept_call(
        &self,
        call_id: &CallId,
        user_id: &UserId,
    ) -> Result<(), CoordinatorError> {
        let session = self.session(call_id)?;
        let (conversation_id, caller_id, callee_id) = {
            let mut s = session.lock().await;
            if *user_id != s.callee_id {
                return Err(CoordinatorError::Forbidden);
            }
            if s.state != CallState::Ringing {
                return Err(CoordinatorError::InvalidState {
                    current: s.state.to_string(),
                });
            }
            s.state = CallState::Active;
            s.answered_at = Some(Utc::now());
            s.generation += 1;
            (s.conversation_id.clone(), s.caller_id.clone(), s.callee_id.clone())
        };

        let event = ServerEvent::CallAccepted {
            session_id: call_id.clone(),
        };
        self.dispatcher.deliver(&caller_id, &event, PushPolicy::Never).await;
        self.dispatcher.deliver(&callee_id, &event, PushPolicy::Never).await;

        // Transcript marker; the call itself already succeeded.
        if let Err(e) = self
            .delivery
            .send_message(
                &conversation_id,
                &caller_id,
                "Call started".to_string(),
                None,
                MessageKind::CallStarted,
            )
            .await
        {
            tracing::warn!(call_id = %call_id, error = %e, "failed to record call_started message");
        }
        Ok(())
    }

    /// Callee declines. Ringing -> Rejected; the conversation is free for
    /// a new call immediately.
    #[instrument(skip(self), fields(call_id = %call_id, user_id = %user_id))]
    pub async fn reject_call(
        &self,
        call_id: &CallId,
        user_id: &UserId,
    ) -> Result<(), CoordinatorError> {
        let session = self.session(call_id)?;
        let (caller_id, callee_id) = {
            let mut s = session.lock().await;
            if *user_id != s.callee_id {
                return Err(CoordinatorError::Forbidden);
            }
            if s.state != CallState::Ringing {
                return Err(CoordinatorError::InvalidState {
                    current: s.state.to_string(),
                });
            }
            s.state = CallState::Rejected;
            s.generation += 1;
            self.active.remove_if(&s.conversation_id, |_, id| id == call_id);
            (s.caller_id.clone(), s.callee_id.clone())
        };

        schedule_eviction(self.sessions.clone(), call_id.clone(), self.session_linger);

        let event = ServerEvent::CallRejected {
            session_id: call_id.clone(),
        };
        self.dispatcher.deliver(&caller_id, &event, PushPolicy::Never).await;
        self.dispatcher.deliver(&callee_id, &event, PushPolicy::Never).await;
        Ok(())
    }

    /// Hang up. Either party may end an active call; only the caller may
    /// cancel while still ringing.
    #[instrument(skip(self), fields(call_id = %call_id, user_id = %user_id))]
    pub async fn end_call(
        &self,
        call_id: &CallId,
        user_id: &UserId,
    ) -> Result<(), CoordinatorError> {
        let session = self.session(call_id)?;
        enum Outcome {
            Ended {
                conversation_id: ConversationId,
                caller_id: UserId,
                callee_id: UserId,
                duration_seconds: u64,
            },
            Cancelled {
                caller_id: UserId,
                callee_id: UserId,
            },
        }

        let outcome = {
            let mut s = session.lock().await;
            if *user_id != s.caller_id && *user_id != s.callee_id {
                return Err(CoordinatorError::Forbidden);
            }
            match s.state {
                CallState::Active => {
                    s.state = CallState::Ended;
                    s.generation += 1;
                    self.active.remove_if(&s.conversation_id, |_, id| id == call_id);
                    let duration = s
                        .answered_at
                        .map(|t| (Utc::now() - t).num_seconds().max(0) as u64)
                        .unwrap_or(0);
                    Outcome::Ended {
                        conversation_id: s.conversation_id.clone(),
                        caller_id: s.caller_id.clone(),
                        callee_id: s.callee_id.clone(),
                        duration_seconds: duration,
                    }
                }
                CallState::Ringing => {
                    // The callee's way out of a ringing call is reject.
                    if *user_id != s.caller_id {
                        return Err(CoordinatorError::Forbidden);
                    }
                    s.state = CallState::Cancelled;
                    s.generation += 1;
                    self.active.remove_if(&s.conversation_id, |_, id| id == call_id);
                    Outcome::Cancelled {
                        caller_id: s.caller_id.clone(),
                        callee_id: s.callee_id.clone(),
                    }
                }
                other => {
                    return Err(CoordinatorError::InvalidState {
                        current: other.to_string(),
                    })
                }
            }
        };

        schedule_eviction(self.sessions.clone(), call_id.clone(), self.session_linger);

        match outcome {
            Outcome::Ended {
                conversation_id,
                caller_id,
                callee_id,
                duration_seconds,
            } => {
                let event = ServerEvent::CallEnded {
                    session_id: call_id.clone(),
                    duration_seconds: Some(duration_seconds),
                };
                self.dispatcher.deliver(&caller_id, &event, PushPolicy::Never).await;
                self.dispatcher.deliver(&callee_id, &event, PushPolicy::Never).await;

                if let Err(e) = self
                    .delivery
                    .send_message(
                        &conversation_id,
                        &caller_id,
                        "Call ended".to_string(),
                        None,
                        MessageKind::CallEnded,
                    )
                    .await
                {
                    tracing::warn!(call_id = %call_id, error = %e, "failed to record call_ended message");
                }
            }
            Outcome::Cancelled { caller_id, callee_id } => {
                let event = ServerEvent::CallEnded {
                    session_id: call_id.clone(),
                    duration_seconds: None,
                };
                self.dispatcher.deliver(&caller_id, &event, PushPolicy::Never).await;
                self.dispatcher.deliver(&callee_id, &event, PushPolicy::Never).await;
            }
        }
        Ok(())
    }

    pub async fn state_of(&self, call_id: &CallId) -> Option<CallState> {
        let session = self.sessions.get(call_id)?.clone();
        let s = session.lock().await;
        Some(s.state)
    }
}

/// Drop a finished session from the map after the linger window. Terminal
/// states never transition again, so the removal is unconditional; a late
/// caller past the window sees `CallNotFound` instead of `InvalidState`.
fn schedule_eviction(
    sessions: Arc<DashMap<CallId, Arc<Mutex<CallSession>>>>,
    call_id: CallId,
    linger: Duration,
) {
    tokio::spawn(async move {
        tokio::time::sleep(linger).await;
        if sessions.remove(&call_id).is_some() {
            tracing::debug!(call_id = %call_id, "evicted finished call session");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionRegistry;
    use parley_core::ids::ShopId;
    use parley_core::model::Conversation;
    use parley_push::RecordingPushGateway;
    use parley_store::{Database, SqliteConversationStore};

    struct Fixture {
        manager: Arc<CallSessionManager>,
        delivery: Arc<DeliveryEngine>,
        registry: Arc<ConnectionRegistry>,
        push: Arc<RecordingPushGateway>,
        conversation: Conversation,
        customer: UserId,
        seller: UserId,
    }

    async fn fixture(ring_timeout: Duration) -> Fixture {
        fixture_with_linger(ring_timeout, Duration::from_secs(300)).await
    }

    async fn fixture_with_linger(ring_timeout: Duration, session_linger: Duration) -> Fixture {
        let store: Arc<dyn ConversationStore> =
            Arc::new(SqliteConversationStore::new(Database::in_memory().unwrap()));
        let registry = Arc::new(ConnectionRegistry::new(32));
        let push = Arc::new(RecordingPushGateway::new());
        let dispatcher = Arc::new(NotificationDispatcher::new(registry.clone(), push.clone()));
        let delivery = Arc::new(DeliveryEngine::new(store.clone(), dispatcher.clone(), 50));
        let manager = Arc::new(CallSessionManager::new(
            store.clone(),
            dispatcher,
            delivery.clone(),
            ring_timeout,
            session_linger,
        ));

        let customer = UserId::from_raw("user_customer");
        let seller = UserId::from_raw("user_seller");
        let conversation = delivery
            .open_conversation(&customer, &seller, &ShopId::from_raw("shop_1"))
            .await
            .unwrap();

        Fixture {
            manager,
            delivery,
            registry,
            push,
            conversation,
            customer,
            seller,
        }
    }

    #[tokio::test]
    async fn only_customer_may_initiate() {
        let f = fixture(Duration::from_secs(45)).await;

        let err = f
            .manager
            .request_call(&f.conversation.id, &f.seller)
            .await
            .unwrap_err();
        assert_eq!(err, CoordinatorError::RoleNotPermitted);

        let err = f
            .manager
            .request_call(&f.conversation.id, &UserId::from_raw("user_other"))
            .await
            .unwrap_err();
        assert_eq!(err, CoordinatorError::NotParticipant);

        assert!(f.manager.request_call(&f.conversation.id, &f.customer).await.is_ok());
    }

    #[tokio::test]
    async fn second_call_in_conversation_conflicts() {
        let f = fixture(Duration::from_secs(45)).await;
        f.manager.request_call(&f.conversation.id, &f.customer).await.unwrap();

        let err = f
            .manager
            .request_call(&f.conversation.id, &f.customer)
            .await
            .unwrap_err();
        assert_eq!(err, CoordinatorError::Conflict);
    }

    #[tokio::test]
    async fn unreachable_callee_still_rings_and_gets_push() {
        let f = fixture(Duration::from_secs(45)).await;

        let outcome = f.manager.request_call(&f.conversation.id, &f.customer).await.unwrap();
        assert!(!outcome.callee_reachable);
        assert_eq!(f.manager.state_of(&outcome.session_id).await, Some(CallState::Ringing));
        assert_eq!(f.push.sent_to(&f.seller).len(), 1);
        assert_eq!(f.push.sent_to(&f.seller)[0].title, "Incoming call");
    }

    #[tokio::test]
    async fn accept_flow_activates_and_records_transcript() {
        let f = fixture(Duration::from_secs(45)).await;
        let (_c, mut caller_rx) = f.registry.register(&f.customer);
        let (_s, mut callee_rx) = f.registry.register(&f.seller);

        let outcome = f.manager.request_call(&f.conversation.id, &f.customer).await.unwrap();
        assert!(outcome.callee_reachable);
        assert!(callee_rx.try_recv().unwrap().contains("call_ringing"));

        // Caller may not answer their own call.
        let err = f
            .manager
            .accept_call(&outcome.session_id, &f.customer)
            .await
            .unwrap_err();
        assert_eq!(err, CoordinatorError::Forbidden);

        f.manager.accept_call(&outcome.session_id, &f.seller).await.unwrap();
        assert_eq!(f.manager.state_of(&outcome.session_id).await, Some(CallState::Active));
        assert!(caller_rx.try_recv().unwrap().contains("call_accepted"));
        assert!(callee_rx.try_recv().unwrap().contains("call_accepted"));

        let page = f.delivery.load_messages(&f.conversation.id, &f.customer, None).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].kind, MessageKind::CallStarted);
    }

    #[tokio::test]
    async fn reject_releases_the_conversation() {
        let f = fixture(Duration::from_secs(45)).await;

        let outcome = f.manager.request_call(&f.conversation.id, &f.customer).await.unwrap();
        f.manager.reject_call(&outcome.session_id, &f.seller).await.unwrap();
        assert_eq!(f.manager.state_of(&outcome.session_id).await, Some(CallState::Rejected));

        // Accept after reject is a dead end.
        let err = f
            .manager
            .accept_call(&outcome.session_id, &f.seller)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CoordinatorError::InvalidState { current: "rejected".into() }
        );

        // But a fresh call may start right away.
        assert!(f.manager.request_call(&f.conversation.id, &f.customer).await.is_ok());
    }

    #[tokio::test]
    async fn end_active_call_reports_duration_and_transcript() {
        let f = fixture(Duration::from_secs(45)).await;
        let (_c, mut caller_rx) = f.registry.register(&f.customer);

        let outcome = f.manager.request_call(&f.conversation.id, &f.customer).await.unwrap();
        f.manager.accept_call(&outcome.session_id, &f.seller).await.unwrap();

        // Either party may hang up; here the seller does.
        f.manager.end_call(&outcome.session_id, &f.seller).await.unwrap();
        assert_eq!(f.manager.state_of(&outcome.session_id).await, Some(CallState::Ended));

        let mut saw_ended = false;
        while let Ok(frame) = caller_rx.try_recv() {
            if frame.contains("call_ended") && frame.contains("duration_seconds") {
                saw_ended = true;
            }
        }
        assert!(saw_ended);

        let page = f.delivery.load_messages(&f.conversation.id, &f.customer, None).await.unwrap();
        let kinds: Vec<_> = page.iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![MessageKind::CallStarted, MessageKind::CallEnded]);

        let err = f
            .manager
            .end_call(&outcome.session_id, &f.seller)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn only_caller_may_cancel_while_ringing() {
        let f = fixture(Duration::from_secs(45)).await;
        let outcome = f.manager.request_call(&f.conversation.id, &f.customer).await.unwrap();

        let err = f
            .manager
            .end_call(&outcome.session_id, &f.seller)
            .await
            .unwrap_err();
        assert_eq!(err, CoordinatorError::Forbidden);

        f.manager.end_call(&outcome.session_id, &f.customer).await.unwrap();
        assert_eq!(f.manager.state_of(&outcome.session_id).await, Some(CallState::Cancelled));

        // Cancelled calls leave no transcript messages behind.
        let page = f.delivery.load_messages(&f.conversation.id, &f.customer, None).await.unwrap();
        assert!(page.is_empty());

        assert!(f.manager.request_call(&f.conversation.id, &f.customer).await.is_ok());
    }

    #[tokio::test]
    async fn unanswered_ring_times_out() {
        let f = fixture(Duration::from_millis(50)).await;
        let (_c, mut caller_rx) = f.registry.register(&f.customer);

        let outcome = f.manager.request_call(&f.conversation.id, &f.customer).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(f.manager.state_of(&outcome.session_id).await, Some(CallState::TimedOut));
        let mut saw_timeout = false;
        while let Ok(frame) = caller_rx.try_recv() {
            if frame.contains("call_timed_out") {
                saw_timeout = true;
            }
        }
        assert!(saw_timeout);

        // Missed-call push for the offline callee.
        assert!(f.push.sent_to(&f.seller).iter().any(|p| p.title == "Missed call"));

        // Late answer is rejected, conversation is free again.
        let err = f
            .manager
            .accept_call(&outcome.session_id, &f.seller)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidState { .. }));
        assert!(f.manager.request_call(&f.conversation.id, &f.customer).await.is_ok());
    }

    #[tokio::test]
    async fn accept_does_not_fire_stale_timeout() {
        let f = fixture(Duration::from_millis(50)).await;

        let outcome = f.manager.request_call(&f.conversation.id, &f.customer).await.unwrap();
        f.manager.accept_call(&outcome.session_id, &f.seller).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(f.manager.state_of(&outcome.session_id).await, Some(CallState::Active));
    }

    #[tokio::test]
    async fn concurrent_accept_and_reject_have_one_winner() {
        for _ in 0..10 {
            let f = fixture(Duration::from_secs(45)).await;
            let outcome = f.manager.request_call(&f.conversation.id, &f.customer).await.unwrap();

            let m1 = f.manager.clone();
            let m2 = f.manager.clone();
            let id1 = outcome.session_id.clone();
            let id2 = outcome.session_id.clone();
            let seller1 = f.seller.clone();
            let seller2 = f.seller.clone();

            let (a, r) = tokio::join!(
                tokio::spawn(async move { m1.accept_call(&id1, &seller1).await }),
                tokio::spawn(async move { m2.reject_call(&id2, &seller2).await }),
            );
            let a = a.unwrap();
            let r = r.unwrap();
            assert!(a.is_ok() ^ r.is_ok(), "exactly one of accept/reject wins");

            let state = f.manager.state_of(&outcome.session_id).await.unwrap();
            if a.is_ok() {
                assert_eq!(state, CallState::Active);
            } else {
                assert_eq!(state, CallState::Rejected);
            }
        }
    }

    #[tokio::test]
    async fn finished_sessions_are_evicted_after_linger() {
        let f = fixture_with_linger(Duration::from_secs(45), Duration::from_millis(50)).await;

        let outcome = f.manager.request_call(&f.conversation.id, &f.customer).await.unwrap();
        f.manager.reject_call(&outcome.session_id, &f.seller).await.unwrap();

        // Still resolvable inside the linger window: late accepts get a
        // state error, not not-found.
        assert_eq!(f.manager.state_of(&outcome.session_id).await, Some(CallState::Rejected));
        let err = f
            .manager
            .accept_call(&outcome.session_id, &f.seller)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidState { .. }));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(f.manager.state_of(&outcome.session_id).await, None);
        let err = f
            .manager
            .accept_call(&outcome.session_id, &f.seller)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::CallNotFound(_)));

        // In-flight sessions are untouched by the sweep.
        let outcome = f.manager.request_call(&f.conversation.id, &f.customer).await.unwrap();
        f.manager.accept_call(&outcome.session_id, &f.seller).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(f.manager.state_of(&outcome.session_id).await, Some(CallState::Active));
    }

    #[tokio::test]
    async fn timed_out_sessions_are_evicted_after_linger() {
        let f = fixture_with_linger(Duration::from_millis(30), Duration::from_millis(50)).await;

        let outcome = f.manager.request_call(&f.conversation.id, &f.customer).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(f.manager.state_of(&outcome.session_id).await, Some(CallState::TimedOut));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(f.manager.state_of(&outcome.session_id).await, None);
    }

    #[tokio::test]
    async fn unknown_call_id_is_reported() {
        let f = fixture(Duration::from_secs(45)).await;
        let err = f
            .manager
            .accept_call(&CallId::from_raw("call_missing"), &f.seller)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::CallNotFound(_)));
    }
}
