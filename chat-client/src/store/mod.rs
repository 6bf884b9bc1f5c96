//! Storage layer for linkchat.
//!
//! Persists the message log and the local profile. The store is the only
//! authority for message ids: every append gets the next id, strictly
//! greater than any id handed out before.

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chat_types::{Message, NewMessage, Profile};
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    /// A stored row could not be turned back into a value.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

/// Trait for message storage backends.
#[async_trait]
pub trait MessageStore: Send + Sync + 'static {
    /// Get the local profile, if one was ever saved.
    async fn get_profile(&self) -> Result<Option<Profile>, StoreError>;

    /// Save the local profile, replacing any previous one.
    async fn set_profile(&self, profile: &Profile) -> Result<(), StoreError>;

    /// Persist a message and assign it the next id.
    ///
    /// Concurrent appends never share an id.
    async fn append(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// All messages ordered by `(timestamp, id)` ascending.
    async fn load_all(&self) -> Result<Vec<Message>, StoreError>;

    /// Number of stored messages.
    async fn count(&self) -> Result<u64, StoreError>;
}
