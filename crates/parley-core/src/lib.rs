//! Core domain types and collaborator traits for the parley coordinator.

pub mod errors;
pub mod events;
pub mod identity;
pub mod ids;
pub mod model;
pub mod push;
pub mod store;

pub use errors::CoordinatorError;
pub use events::ServerEvent;
pub use model::{Conversation, ConversationSummary, Message, MessageKind, Role};
