//! SQLite storage backend for linkchat.

use super::{MessageStore, StoreError};
use async_trait::async_trait;
use chat_types::{Message, MessageId, NewMessage, Profile};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

/// SQLite-based message store.
///
/// Uses WAL mode for concurrent reads/writes. Appends are serialized so that
/// id order matches commit order.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    append_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("connections", &self.pool.size())
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) the store at a database path.
    ///
    /// Opening an existing store keeps its contents.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(StoreError::Database)?;

        Self::with_pool(pool).await
    }

    /// Create an in-memory store (for testing).
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StoreError::Database)?
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // One connection that never expires, or the database vanishes with it
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(StoreError::Database)?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self {
            pool,
            append_lock: Arc::new(Mutex::new(())),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Close the underlying pool. Later calls fail with a database error.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sender TEXT NOT NULL,
                text TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS profile (
                slot INTEGER PRIMARY KEY CHECK (slot = 0),
                username TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_order ON messages(timestamp, id)")
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        Ok(())
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn get_profile(&self) -> Result<Option<Profile>, StoreError> {
        let username: Option<String> =
            sqlx::query_scalar("SELECT username FROM profile WHERE slot = 0")
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::Database)?;

        Ok(username.map(Profile::new))
    }

    async fn set_profile(&self, profile: &Profile) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO profile (slot, username)
            VALUES (0, ?1)
            ON CONFLICT(slot) DO UPDATE SET username = ?1
            "#,
        )
        .bind(&profile.username)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        Ok(())
    }

    async fn append(&self, message: NewMessage) -> Result<Message, StoreError> {
        let _guard = self.append_lock.lock().await;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO messages (sender, text, timestamp)
            VALUES (?1, ?2, ?3)
            RETURNING id
            "#,
        )
        .bind(&message.sender)
        .bind(&message.text)
        .bind(message.timestamp)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        let id = u64::try_from(id)
            .map_err(|_| StoreError::InvalidRecord(format!("negative message id {}", id)))?;
        Ok(message.with_id(MessageId::new(id)))
    }

    async fn load_all(&self) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, sender, text, timestamp
            FROM messages
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        rows.into_iter().map(|row| row.try_into()).collect()
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        Ok(count as u64)
    }
}

/// Internal row type for SQLite queries.
#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    sender: String,
    text: String,
    timestamp: i64,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let id = u64::try_from(row.id)
            .map_err(|_| StoreError::InvalidRecord(format!("negative message id {}", row.id)))?;
        Ok(Message {
            id: MessageId::new(id),
            sender: row.sender,
            text: row.text,
            timestamp: row.timestamp,
        })
    }
}
