//! Message Persistence
//!
//! The hub only needs two things from storage: append an accepted message
//! and read back the most recent ones for a joining connection.
//!
//! - **types**: `Message`, the persisted and wire-level unit
//! - **sqlite**: durable store backed by SQLite
//! - **memory**: bounded in-process store for ephemeral runs and tests
//! - **error**: Error types
//!
//! # Example
//!
//! ```rust,no_run
//! use murmur::storage::{Message, MessageStore, SqliteMessageStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = SqliteMessageStore::open("./murmur.db")?;
//!
//!     store.save(&Message::new("chat", "hello", "alice")).await?;
//!
//!     // Oldest first, ready to replay
//!     let backlog = store.recent_messages(50).await?;
//!     println!("{} messages in backlog", backlog.len());
//!
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryMessageStore;
pub use sqlite::SqliteMessageStore;
pub use types::{Message, SERVER_SENDER};

use async_trait::async_trait;

/// Durable storage for accepted messages
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist one accepted message
    async fn save(&self, message: &Message) -> StoreResult<()>;

    /// The `limit` most recent messages, oldest first
    async fn recent_messages(&self, limit: usize) -> StoreResult<Vec<Message>>;

    /// Short name for logs and health output
    fn backend(&self) -> &'static str;
}
