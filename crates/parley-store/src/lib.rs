pub mod adapter;
pub mod conversations;
pub mod database;
pub mod error;
pub mod messages;
pub mod rows;
pub mod schema;

pub use adapter::SqliteConversationStore;
pub use database::Database;
pub use error::StoreError;
