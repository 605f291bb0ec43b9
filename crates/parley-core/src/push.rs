use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// Payload handed to the push gateway for devices with no open connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    /// Event data the client app uses for routing (conversation id, call id).
    pub data: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
#[error("push gateway: {0}")]
pub struct PushError(pub String);

/// Out-of-app delivery. Success or failure is reported once; this subsystem
/// never retries a push.
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send_push(&self, user_id: &UserId, payload: &PushPayload) -> Result<(), PushError>;
}
