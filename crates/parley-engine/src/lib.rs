//! The coordinator proper: connection registry, message delivery, call
//! signaling, typing/presence, and the notification dispatcher.

pub mod calls;
pub mod config;
pub mod delivery;
pub mod dispatch;
pub mod presence;
pub mod registry;

pub use calls::{CallKind, CallSessionManager, CallState, RequestOutcome};
pub use config::CoordinatorConfig;
pub use delivery::DeliveryEngine;
pub use dispatch::{NotificationDispatcher, PushPolicy};
pub use presence::TypingTracker;
pub use registry::ConnectionRegistry;
