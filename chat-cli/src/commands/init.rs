//! Claim the local username.

use anyhow::Result;
use chat_client::{EngineError, MockTransport};
use std::path::Path;

use super::start_engine;
use crate::config::Config;

/// Run the init command.
pub async fn run(data_dir: &Path, config: &Config, username: &str) -> Result<()> {
    let (engine, _events) = start_engine(data_dir, config, MockTransport::new()).await?;

    let claimed = engine.claim_profile(username).await;
    engine.shutdown().await;

    let profile = match claimed {
        Ok(profile) => profile,
        Err(EngineError::ProfileAlreadySet) => {
            let existing = engine
                .profile()
                .map(|p| p.username.clone())
                .unwrap_or_default();
            anyhow::bail!(
                "Profile already set to '{}'. Usernames cannot be changed.",
                existing
            );
        }
        Err(e) => return Err(e.into()),
    };

    println!("Profile created!");
    println!();
    println!("  Username: {}", profile.username);
    println!("  Data dir: {}", data_dir.display());
    println!();
    println!("Next steps:");
    println!("  linkchat send \"hello\" --mock-peers 2");

    Ok(())
}
