//! Replay the stored conversation.

use anyhow::Result;
use chat_client::{Clock, MessageStore, SystemClock};
use chat_types::Message;
use std::path::Path;

use super::open_store;
use crate::config::Config;

/// Run the history command.
pub async fn run(data_dir: &Path, config: &Config, limit: Option<usize>) -> Result<()> {
    let store = open_store(data_dir, config).await?;
    let messages = store.load_all().await?;
    let profile = store.get_profile().await?;

    if messages.is_empty() {
        println!("No messages yet.");
        return Ok(());
    }

    let skip = limit.map_or(0, |n| messages.len().saturating_sub(n));
    let now = SystemClock.now_millis();
    for message in &messages[skip..] {
        let mine = profile
            .as_ref()
            .is_some_and(|p| p.username == message.sender);
        println!("{}", format_line(message, mine, now));
    }

    Ok(())
}

fn format_line(message: &Message, mine: bool, now: i64) -> String {
    let marker = if mine { '>' } else { ' ' };
    format!(
        "{} #{:<4} {:<14} {}: {}",
        marker,
        message.id,
        format_age(message.timestamp, now),
        message.sender,
        message.text
    )
}

/// Format a millisecond timestamp relative to `now`.
fn format_age(ts: i64, now: i64) -> String {
    let diff = now.saturating_sub(ts).max(0) / 1000;

    if diff < 60 {
        "just now".to_string()
    } else if diff < 3600 {
        format!("{} minutes ago", diff / 60)
    } else if diff < 86400 {
        format!("{} hours ago", diff / 3600)
    } else {
        format!("{} days ago", diff / 86400)
    }
}
