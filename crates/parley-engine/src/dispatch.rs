use std::sync::Arc;

use parley_core::events::ServerEvent;
use parley_core::ids::UserId;
use parley_core::push::{PushGateway, PushPayload};

use crate::registry::ConnectionRegistry;

/// Whether an event additionally goes out through the push gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushPolicy {
    /// Push regardless of live delivery (call ringing must reach a
    /// backgrounded app).
    Always,
    /// Push only when no live connection received the event.
    BestEffort,
    /// Live connections only (typing, read receipts, sender echo).
    Never,
}

/// Decides, per event, between live fan-out and push fallback. Push
/// failures are logged and never escalated to the originating operation.
pub struct NotificationDispatcher {
    registry: Arc<ConnectionRegistry>,
    push: Arc<dyn PushGateway>,
}

impl NotificationDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>, push: Arc<dyn PushGateway>) -> Self {
        Self { registry, push }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Deliver an event to every live connection of the target, then push
    /// according to policy. Returns the number of live deliveries.
    pub async fn deliver(&self, target: &UserId, event: &ServerEvent, policy: PushPolicy) -> usize {
        let json = match serde_json::to_string(event) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(event = event.event_type(), error = %e, "event serialization failed");
                return 0;
            }
        };

        let delivered = self.registry.send_to_user(target, &json);

        let should_push = match policy {
            PushPolicy::Always => true,
            PushPolicy::BestEffort => delivered == 0,
            PushPolicy::Never => false,
        };

        if should_push {
            let payload = push_payload(event);
            if let Err(e) = self.push.send_push(target, &payload).await {
                tracing::warn!(
                    user_id = %target,
                    event = event.event_type(),
                    error = %e,
                    "push dispatch failed, skipping"
                );
            }
        }

        delivered
    }
}

fn push_payload(event: &ServerEvent) -> PushPayload {
    let (title, body) = match event {
        ServerEvent::MessageReceived { message } => {
            ("New message".to_string(), message.preview())
        }
        ServerEvent::CallRinging { caller_id, .. } => {
            ("Incoming call".to_string(), format!("{caller_id} is calling"))
        }
        ServerEvent::CallTimedOut { .. } => ("Missed call".to_string(), String::new()),
        other => (other.event_type().replace('_', " "), String::new()),
    };
    PushPayload {
        title,
        body,
        data: serde_json::to_value(event).unwrap_or_default(),
    }
}
