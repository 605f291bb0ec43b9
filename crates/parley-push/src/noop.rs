use async_trait::async_trait;

use parley_core::ids::UserId;
use parley_core::push::{PushError, PushGateway, PushPayload};

/// Gateway for deployments without a push provider configured. Every send
/// succeeds and is only visible at debug level.
#[derive(Default)]
pub struct NoopPushGateway;

#[async_trait]
impl PushGateway for NoopPushGateway {
    async fn send_push(&self, user_id: &UserId, payload: &PushPayload) -> Result<(), PushError> {
        tracing::debug!(user_id = %user_id, title = %payload.title, "push disabled, dropping");
        Ok(())
    }
}
