use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CallId, ConversationId, UserId};
use crate::model::Message;

/// Events fanned out to live client connections.
/// One serialized form is shared by every device of a target user.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "message_received")]
    MessageReceived { message: Message },

    #[serde(rename = "typing_changed")]
    TypingChanged {
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
    },

    #[serde(rename = "read_receipt")]
    ReadReceipt {
        conversation_id: ConversationId,
        user_id: UserId,
        up_to: DateTime<Utc>,
    },

    #[serde(rename = "call_ringing")]
    CallRinging {
        session_id: CallId,
        conversation_id: ConversationId,
        caller_id: UserId,
    },

    #[serde(rename = "call_accepted")]
    CallAccepted { session_id: CallId },

    #[serde(rename = "call_rejected")]
    CallRejected { session_id: CallId },

    #[serde(rename = "call_ended")]
    CallEnded {
        session_id: CallId,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_seconds: Option<u64>,
    },

    #[serde(rename = "call_timed_out")]
    CallTimedOut { session_id: CallId },
}

impl ServerEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageReceived { .. } => "message_received",
            Self::TypingChanged { .. } => "typing_changed",
            Self::ReadReceipt { .. } => "read_receipt",
            Self::CallRinging { .. } => "call_ringing",
            Self::CallAccepted { .. } => "call_accepted",
            Self::CallRejected { .. } => "call_rejected",
            Self::CallEnded { .. } => "call_ended",
            Self::CallTimedOut { .. } => "call_timed_out",
        }
    }
}
