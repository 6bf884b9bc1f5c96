//! CLI command implementations.

pub mod history;
pub mod init;
pub mod send;
pub mod status;

use anyhow::{Context, Result};
use chat_client::{ChatEvent, MockTransport, SqliteStore, SyncEngine};
use std::path::Path;
use tokio::sync::mpsc;

use crate::config::Config;

/// Engine over the simulated transport and the on-disk store.
pub type Engine = SyncEngine<MockTransport, SqliteStore>;

/// Open the message database named by the configuration.
pub async fn open_store(data_dir: &Path, config: &Config) -> Result<SqliteStore> {
    let path = config.database_path(data_dir);
    SqliteStore::open(&path)
        .await
        .with_context(|| format!("Failed to open message database {}", path.display()))
}

/// Start an engine on the given transport.
pub async fn start_engine(
    data_dir: &Path,
    config: &Config,
    transport: MockTransport,
) -> Result<(Engine, mpsc::UnboundedReceiver<ChatEvent>)> {
    let store = open_store(data_dir, config).await?;
    SyncEngine::start(transport, store, config.engine_config())
        .await
        .context("Failed to start engine")
}
