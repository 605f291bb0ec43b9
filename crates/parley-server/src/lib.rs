//! WebSocket transport for the coordinator: token-gated upgrades, the
//! request/response frame protocol, and connection heartbeats.

pub mod handlers;
pub mod rpc;
pub mod server;
pub mod ws;

pub use handlers::HandlerState;
pub use parley_engine::CoordinatorConfig;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
