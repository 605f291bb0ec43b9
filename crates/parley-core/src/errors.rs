/// Error taxonomy for coordinator operations.
///
/// Validation and state-machine errors are returned synchronously to the
/// initiating operation. Delivery-side failures (dead connection, push
/// gateway timeout) never surface here; they are logged and skipped so a
/// persisted message or session is never rolled back by partial fan-out.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    #[error("sender is not a participant of this conversation")]
    NotParticipant,

    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("persistence failed: {0}")]
    PersistenceFailed(String),

    #[error("a call is already in progress for this conversation")]
    Conflict,

    #[error("user may not act on this call")]
    Forbidden,

    #[error("transition not allowed from state {current}")]
    InvalidState { current: String },

    #[error("only the customer may start a call")]
    RoleNotPermitted,

    #[error("call session not found: {0}")]
    CallNotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl CoordinatorError {
    /// Stable wire code for RPC error responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotParticipant => "NOT_PARTICIPANT",
            Self::ConversationNotFound(_) => "CONVERSATION_NOT_FOUND",
            Self::PersistenceFailed(_) => "PERSISTENCE_FAILED",
            Self::Conflict => "CONFLICT",
            Self::Forbidden => "FORBIDDEN",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::RoleNotPermitted => "ROLE_NOT_PERMITTED",
            Self::CallNotFound(_) => "CALL_NOT_FOUND",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True when the caller's own request was invalid, as opposed to an
    /// infrastructure failure the caller may retry at the transport level.
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::PersistenceFailed(_) | Self::Internal(_))
    }
}
