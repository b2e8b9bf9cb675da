//! Signal handling for graceful shutdown and config reload.

use crate::config::ConfigLoader;
use paywatch_core::config::{ConfigStore, MatchingConfig};
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;

/// Completes when SIGTERM or SIGINT (Ctrl+C) arrives. If the handlers cannot
/// be installed, falls back to `ctrl_c`.
pub async fn shutdown_signal() {
    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!(error = %e, "Failed to install signal handlers, using ctrl_c");
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl_c");
                std::future::pending::<()>().await;
            }
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, initiating graceful shutdown");
        }
    }
}

/// Wait for the shutdown flag to flip.
pub async fn wait_for_shutdown(mut shutdown_rx: watch::Receiver<bool>) {
    while !*shutdown_rx.borrow() {
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

/// Spawns a task that reloads the matching settings on SIGHUP. Other
/// sections need a restart.
pub fn spawn_config_reload_handler(
    config_loader: Arc<ConfigLoader>,
    matching: ConfigStore<MatchingConfig>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut sighup = match signal(SignalKind::hangup()) {
            Ok(sighup) => sighup,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGHUP handler, reload disabled");
                return;
            }
        };

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::debug!("Config reload handler shutting down");
                        break;
                    }
                }
                _ = sighup.recv() => {
                    tracing::info!(path = ?config_loader.path(), "Received SIGHUP, reloading configuration");
                    match config_loader.reload_matching() {
                        Ok(new_matching) => {
                            let version = matching.update(new_matching).await;
                            tracing::info!(version, "Matching configuration reloaded");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to reload configuration");
                        }
                    }
                }
            }
        }
    });
}
