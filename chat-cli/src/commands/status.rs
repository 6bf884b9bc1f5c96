//! Show linkchat status.

use anyhow::Result;
use chat_client::MessageStore;
use std::path::Path;

use super::open_store;
use crate::config::{Config, CONFIG_FILE};

/// Run the status command.
pub async fn run(data_dir: &Path, config: &Config) -> Result<()> {
    println!("=== linkchat status ===");
    println!();

    let store = open_store(data_dir, config).await?;

    // Check profile
    match store.get_profile().await? {
        Some(profile) => {
            println!("Profile:");
            println!("  Username: {}", profile.username);
        }
        None => {
            println!("Profile: NOT INITIALIZED");
            println!();
            println!("Run 'linkchat init --username <name>' to initialize.");
            return Ok(());
        }
    }

    println!();

    println!("Storage:");
    println!("  Database: {}", config.database_path(data_dir).display());
    println!("  Messages: {}", store.count().await?);

    println!();

    println!("Discovery:");
    println!("  Service:     {}", config.discovery.service);
    println!(
        "  Name prefix: {}",
        config.discovery.name_prefix.as_deref().unwrap_or("(any)")
    );
    let config_path = data_dir.join(CONFIG_FILE);
    if config_path.exists() {
        println!("  Config:      {}", config_path.display());
    } else {
        println!("  Config:      defaults ({} not found)", CONFIG_FILE);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_types::{NewMessage, Profile};
    use tempfile::tempdir;

    #[tokio::test]
    async fn status_without_init() {
        let dir = tempdir().unwrap();

        // Should succeed but show "not initialized"
        let result = run(dir.path(), &Config::default()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn status_with_profile_and_messages() {
        let dir = tempdir().unwrap();
        let config = Config::default();

        let store = open_store(dir.path(), &config).await.unwrap();
        store.set_profile(&Profile::new("alice")).await.unwrap();
        store
            .append(NewMessage::new("alice", "hi", 1000))
            .await
            .unwrap();

        let result = run(dir.path(), &config).await;
        assert!(result.is_ok());
    }
}
