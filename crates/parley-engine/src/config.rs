use std::time::Duration;

/// Tunables for the coordinator. Defaults match observed product behavior;
/// tests shrink the timers.
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// How long a call rings before auto-timeout.
    pub ring_timeout: Duration,
    /// Idle window after which a typing flag clears itself.
    pub typing_idle: Duration,
    /// How long a finished call session stays resolvable (late accepts
    /// get a state error instead of not-found) before eviction.
    pub session_linger: Duration,
    /// Messages per `load_messages` page.
    pub page_size: u32,
    /// Bounded per-connection send queue.
    pub max_send_queue: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            ring_timeout: Duration::from_secs(45),
            typing_idle: Duration::from_secs(2),
            session_linger: Duration::from_secs(300),
            page_size: 50,
            max_send_queue: 256,
        }
    }
}
