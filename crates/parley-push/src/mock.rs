use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use parley_core::ids::UserId;
use parley_core::push::{PushError, PushGateway, PushPayload};

/// Records every push instead of sending it. Flip `fail` to exercise the
/// log-and-skip path in callers.
#[derive(Default)]
pub struct RecordingPushGateway {
    sent: Mutex<Vec<(UserId, PushPayload)>>,
    fail: AtomicBool,
}

impl RecordingPushGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }

    pub fn sent(&self) -> Vec<(UserId, PushPayload)> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn sent_to(&self, user: &UserId) -> Vec<PushPayload> {
        self.sent
            .lock()
            .iter()
            .filter(|(u, _)| u == user)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl PushGateway for RecordingPushGateway {
    async fn send_push(&self, user_id: &UserId, payload: &PushPayload) -> Result<(), PushError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(PushError("simulated gateway failure".into()));
        }
        self.sent.lock().push((user_id.clone(), payload.clone()));
        Ok(())
    }
}
