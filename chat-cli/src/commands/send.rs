//! Store a message and send it to nearby peers.

use anyhow::{Context, Result};
use chat_client::{ConnectOutcome, MockTransport, SendReport};
use std::path::Path;

use super::start_engine;
use crate::config::Config;

/// Run the send command.
///
/// The radio stack is not part of linkchat, so peers are simulated: each of
/// the `mock_peers` devices is discovered, connected, and written to.
pub async fn run(data_dir: &Path, config: &Config, text: &str, mock_peers: usize) -> Result<()> {
    let transport = simulated_peers(config, mock_peers);
    let (engine, _events) = start_engine(data_dir, config, transport).await?;

    let Some(profile) = engine.profile() else {
        anyhow::bail!("No profile. Run 'linkchat init --username <name>' first.");
    };
    tracing::debug!("Sending as {}", profile.username);

    for _ in 0..mock_peers {
        match engine
            .discover_and_connect()
            .await
            .context("Failed to connect to peer")?
        {
            ConnectOutcome::Connected(peer) => tracing::debug!("Connected to {}", peer),
            ConnectOutcome::AlreadyConnected => {}
        }
    }

    let report = engine.send_local(text).await?;
    engine.shutdown().await;

    match report {
        Some(report) => print_report(&report),
        None => println!("Nothing to send (message is empty)."),
    }

    Ok(())
}

fn simulated_peers(config: &Config, count: usize) -> MockTransport {
    let transport = MockTransport::new();
    let name_prefix = config.discovery.name_prefix.as_deref().unwrap_or("");
    for i in 1..=count {
        let name = format!("{}peer {}", name_prefix, i);
        transport.add_device_advertising(
            &format!("mock-peer-{}", i),
            Some(&name),
            &config.discovery.service,
        );
    }
    transport
}

fn print_report(report: &SendReport) {
    println!("Stored message #{}", report.message.id);
    println!(
        "Delivered to {} of {} peers",
        report.delivered(),
        report.deliveries.len()
    );
    for delivery in &report.deliveries {
        match &delivery.outcome {
            Ok(()) => println!("  {}: delivered", delivery.device_id),
            Err(e) => println!("  {}: failed ({})", delivery.device_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{init, open_store};
    use chat_client::MessageStore;
    use tempfile::tempdir;

    #[tokio::test]
    async fn send_requires_profile() {
        let dir = tempdir().unwrap();
        let result = run(dir.path(), &Config::default(), "hi", 0).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn send_stores_message() {
        let dir = tempdir().unwrap();
        let config = Config::default();
        init::run(dir.path(), &config, "alice").await.unwrap();

        run(dir.path(), &config, "hi", 2).await.unwrap();

        let store = open_store(dir.path(), &config).await.unwrap();
        let messages = store.load_all().await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, "alice");
        assert_eq!(messages[0].text, "hi");
    }

    #[tokio::test]
    async fn blank_send_stores_nothing() {
        let dir = tempdir().unwrap();
        let config = Config::default();
        init::run(dir.path(), &config, "alice").await.unwrap();

        run(dir.path(), &config, "   ", 1).await.unwrap();

        let store = open_store(dir.path(), &config).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[test]
    fn simulated_peers_match_discovery_filter() {
        let mut config = Config::default();
        config.discovery.name_prefix = Some("chat-".into());

        let transport = simulated_peers(&config, 3);
        let filter = config.engine_config().discovery;
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let device = rt
            .block_on(chat_client::Transport::discover(&transport, &filter))
            .unwrap();
        assert_eq!(device.name.as_deref(), Some("chat-peer 1"));
    }
}
