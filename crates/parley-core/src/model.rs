use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, MessageId, ShopId, UserId};

/// A participant's role inside a conversation. The customer opened the
/// conversation about the seller's shop; only the customer may start calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Seller,
}

/// Durable pairing of a customer and a seller around one shop.
/// Identity is immutable; only the `last_message_*` fields move.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub customer_id: UserId,
    pub seller_id: UserId,
    pub shop_id: ShopId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_preview: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_participant(&self, user: &UserId) -> bool {
        self.customer_id == *user || self.seller_id == *user
    }

    pub fn role_of(&self, user: &UserId) -> Option<Role> {
        if self.customer_id == *user {
            Some(Role::Customer)
        } else if self.seller_id == *user {
            Some(Role::Seller)
        } else {
            None
        }
    }

    /// The other party, given one participant. None for outsiders.
    pub fn counterpart(&self, user: &UserId) -> Option<&UserId> {
        match self.role_of(user)? {
            Role::Customer => Some(&self.seller_id),
            Role::Seller => Some(&self.customer_id),
        }
    }

    pub fn participants(&self) -> [&UserId; 2] {
        [&self.customer_id, &self.seller_id]
    }
}

/// One inbox row: a conversation plus the reader's unread count.
#[derive(Clone, Debug, Serialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub unread_count: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    System,
    CallStarted,
    CallEnded,
}

impl MessageKind {
    /// System-authored kinds are injected by the coordinator, never typed
    /// by a participant.
    pub fn is_system(&self) -> bool {
        matches!(self, Self::System | Self::CallStarted | Self::CallEnded)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Image => write!(f, "image"),
            Self::System => write!(f, "system"),
            Self::CallStarted => write!(f, "call_started"),
            Self::CallEnded => write!(f, "call_ended"),
        }
    }
}

impl std::str::FromStr for MessageKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "system" => Ok(Self::System),
            "call_started" => Ok(Self::CallStarted),
            "call_ended" => Ok(Self::CallEnded),
            other => Err(format!("unknown message kind: {other}")),
        }
    }
}

/// One message inside a conversation. `created_at` is server-assigned and
/// strictly increasing per conversation; `read_at` is the only mutable field.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Short preview stored on the conversation row.
    pub fn preview(&self) -> String {
        match self.kind {
            MessageKind::Image => "[image]".to_string(),
            MessageKind::CallStarted => "[call started]".to_string(),
            MessageKind::CallEnded => "[call ended]".to_string(),
            _ => {
                let mut p: String = self.body.chars().take(80).collect();
                if self.body.chars().count() > 80 {
                    p.push('…');
                }
                p
            }
        }
    }
}
