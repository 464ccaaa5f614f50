//! Directory Server Application
//!
//! Runs a server-role packet router with the server directory attached.
//! With `central_address = "localhost"` this node is the central server,
//! otherwise it registers at the configured central server.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use conference_transport::{
    config::AppConfig,
    directory::ServerDirectory,
    network::{Dispatcher, HostAddress, PacketRouter, RouterMessageChannel, RouterRole, ServerConsumer},
    protocol::MessageChannel,
    server::DirectoryServerCore,
};

/// Audio side of the server: counts packets and wakes the server loop
struct AudioCounter {
    packets: Arc<AtomicU64>,
}

impl ServerConsumer for AudioCounter {
    fn put_data(&self, data: &[u8], from: HostAddress) -> bool {
        tracing::trace!("Audio packet ({} bytes) from {}", data.len(), from);
        self.packets.fetch_add(1, Ordering::Relaxed);
        true
    }
}

fn load_config() -> Result<AppConfig> {
    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(AppConfig::default_path);

    match path {
        Some(path) if path.exists() => {
            tracing::info!("Loading config from {}", path.display());
            AppConfig::load(&path).with_context(|| format!("invalid config {}", path.display()))
        }
        Some(path) => {
            tracing::info!("No config at {}, using defaults", path.display());
            Ok(AppConfig::default())
        }
        None => Ok(AppConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting directory server");

    let config = load_config()?;

    let mut router = PacketRouter::bind(&config.network, RouterRole::Server)
        .context("failed to bind server port")?;
    let channel: Arc<dyn MessageChannel> = Arc::new(RouterMessageChannel::new(router.handle()));

    let directory = Arc::new(ServerDirectory::new(
        router.local_addr().port(),
        &config.directory,
        channel.clone(),
    ));
    tracing::info!(
        "Directory role {:?}, central '{}', {} predefined servers",
        directory.role(),
        directory.central_address(),
        directory.num_predefined()
    );

    let audio_packets = Arc::new(AtomicU64::new(0));
    let audio = AudioCounter {
        packets: audio_packets.clone(),
    };
    let core = DirectoryServerCore::new(directory.clone(), channel, audio);
    let (dispatcher, wake) = Dispatcher::server(Arc::new(core));
    router.start(dispatcher)?;

    directory.update();

    // Server loop stand-in: drains wake-ups from the router
    let wakeups = Arc::new(AtomicU64::new(0));
    let wakeups_for_loop = wakeups.clone();
    std::thread::Builder::new()
        .name("server-loop".to_string())
        .spawn(move || {
            while wake.recv().is_ok() {
                wakeups_for_loop.fetch_add(1, Ordering::Relaxed);
            }
        })?;

    let (stop_tx, mut stop_rx) = tokio::sync::mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .context("failed to install Ctrl+C handler")?;

    tracing::info!("Listening on {}", router.local_addr());

    let mut stats_interval = tokio::time::interval(Duration::from_secs(30));
    stats_interval.tick().await;

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = stats_interval.tick() => {
                let stats = router.stats();
                tracing::info!(
                    "Stats: {} servers listed, {} packets in, {} out, {} audio, {} wake-ups",
                    directory.len(),
                    stats.packets_received,
                    stats.packets_sent,
                    audio_packets.load(Ordering::Relaxed),
                    wakeups.load(Ordering::Relaxed)
                );
            }
        }
    }

    tracing::info!("Shutting down");
    directory.shutdown();
    router.stop();

    Ok(())
}
