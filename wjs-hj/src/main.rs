//! Head-judge coordinator (wjs-hj) - Main entry point
//!
//! Headless coordinator for live tournament scoring: connects the remote
//! data gateway, the live event channel, the tournament state store and
//! the reconciler, then keeps running until interrupted. Store changes are
//! logged in place of a UI.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wjs_common::api::auth::AuthState;
use wjs_common::config;
use wjs_hj::channel::{LiveChannel, SseLiveChannel};
use wjs_hj::gateway::{HttpGateway, RemoteGateway};
use wjs_hj::{Reconciler, TournamentStore};

/// Command-line arguments for wjs-hj
#[derive(Parser, Debug)]
#[command(name = "wjs-hj")]
#[command(about = "Head-judge coordinator for live tournament scoring")]
#[command(version)]
struct Args {
    /// Tournament service base URL
    #[arg(short, long, env = "WJS_SERVER_URL")]
    server_url: Option<String>,

    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wjs_hj=debug,wjs_common=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = config::resolve(args.server_url.as_deref(), args.config.as_deref())
        .context("Failed to load configuration")?;

    info!(
        "Starting WJS head-judge coordinator against {}",
        config.server_url
    );

    // Auth state and transports are constructed once and passed by handle
    let auth = Arc::new(AuthState::new());
    let gateway: Arc<dyn RemoteGateway> = Arc::new(
        HttpGateway::with_timeout(
            config.server_url.as_str(),
            Arc::clone(&auth),
            config.request_timeout(),
        )
        .context("Failed to create gateway")?,
    );
    let channel = Arc::new(
        SseLiveChannel::new(&config.server_url, Arc::clone(&auth))
            .context("Failed to create live channel")?,
    );
    let intake = Arc::clone(&channel).spawn_intake();

    match (&config.username, &config.password) {
        (Some(username), Some(password)) => {
            gateway
                .login(username, password)
                .await
                .context("Login failed")?;
        }
        _ => warn!("No credentials configured; proceeding unauthenticated"),
    }

    let store = Arc::new(TournamentStore::new());
    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&store),
        Arc::clone(&gateway),
        Arc::clone(&channel) as Arc<dyn LiveChannel>,
    ));

    // Initial sync: divisions, participants, active/on-deck pointers and
    // the active participant's scores
    if let Err(err) = reconciler.refresh_divisions().await {
        warn!("Initial division sync failed: {err}");
    }
    if let Err(err) = reconciler.refresh_participants().await {
        warn!("Initial participant sync failed: {err}");
    }

    // Headless stand-in for a UI: log every store change
    let mut observer = store.observe();
    let observer_task = tokio::spawn(async move {
        while observer.changed().await.is_ok() {
            let snap = observer.borrow().clone();
            info!(
                phase = ?snap.phase,
                active = ?snap.active_participant.as_ref().map(|p| p.name()),
                scores = snap.scores.len(),
                error = ?snap.last_error,
                "Tournament state changed"
            );
        }
    });

    let event_loop = tokio::spawn(Arc::clone(&reconciler).run());

    shutdown_signal().await;
    info!("Shutting down");

    intake.abort();
    event_loop.abort();
    observer_task.abort();
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
