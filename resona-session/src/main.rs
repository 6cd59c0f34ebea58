//! resonad - Resona session daemon entry point
//!
//! Wires the default collaborators around the session library and
//! serves the HTTP command API with the SSE event feed.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use resona_session::api::{self, AppState};
use resona_session::config::Config;
use resona_session::db::SettingsStore;
use resona_session::hub::{HubDeps, SessionHub};
use resona_session::playback::{DirectResolver, SimPlayerFactory};
use resona_session::resources::{ResourceCoordinator, SimulatedPlatform};

/// Command-line arguments for resonad
#[derive(Parser, Debug)]
#[command(name = "resonad")]
#[command(about = "Resona playback session daemon")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "RESONA_PORT")]
    port: Option<u16>,

    /// Path to the sqlite settings database (overrides the config file)
    #[arg(short, long, env = "RESONA_DB")]
    db: Option<PathBuf>,

    /// Path to a toml configuration file
    #[arg(short, long, env = "RESONA_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "resona_session=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref()).context("Failed to load config")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(db) = args.db {
        config.db_path = Some(db);
    }

    info!("Starting Resona session daemon on port {}", config.port);

    let store = match &config.db_path {
        Some(path) => SettingsStore::open(path)
            .await
            .context("Failed to open settings database")?,
        None => SettingsStore::in_memory()
            .await
            .context("Failed to open in-memory settings store")?,
    };

    let platform = Arc::new(SimulatedPlatform::default());
    let coordinator = Arc::new(ResourceCoordinator::new(&*platform, &*platform, &*platform));
    let hub = SessionHub::start(HubDeps {
        factory: Arc::new(SimPlayerFactory::new()),
        resolver: Arc::new(DirectResolver),
        store,
        coordinator,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = AppState {
        hub: Arc::clone(&hub),
    };
    api::run(state, addr, shutdown_signal())
        .await
        .context("Server error")?;

    hub.shutdown();
    info!("Server shutdown complete");
    Ok(())
}

/// Wait for ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
