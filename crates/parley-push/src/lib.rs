//! Push gateway adapters: HTTP for production, a no-op for deployments
//! without a provider, and a recording mock for tests.

pub mod http;
pub mod mock;
pub mod noop;

pub use http::HttpPushGateway;
pub use mock::RecordingPushGateway;
pub use noop::NoopPushGateway;
