//! Process signal handling (§6 External Interfaces).
//!
//! SIGUSR1 starts a graceful drain (stop accepting, let in-flight requests
//! finish); SIGALRM is the drain's own deadline — if it fires before the
//! drain completes, the process exits hard; SIGTERM exits hard
//! immediately; SIGHUP reloads configuration from disk and publishes the
//! new snapshot through an [`arc_swap::ArcSwap`] so in-flight requests keep
//! running against whatever snapshot they already captured.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;

/// How long a graceful drain is given after SIGUSR1 before this process
/// hard-exits on its own, independent of whether SIGALRM ever arrives.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Spawns the signal-handling task. Returns a [`CancellationToken`] the
/// acceptor loop selects on to know when to stop taking new connections.
pub fn spawn(config_path: PathBuf, config: Arc<ArcSwap<GatewayConfig>>) -> CancellationToken {
    let shutdown = CancellationToken::new();
    let task_token = shutdown.clone();

    tokio::spawn(async move {
        let mut usr1 = signal(SignalKind::user_defined1()).expect("failed to register SIGUSR1 handler");
        let mut alrm = signal(SignalKind::alarm()).expect("failed to register SIGALRM handler");
        let mut term = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        let mut hup = signal(SignalKind::hangup()).expect("failed to register SIGHUP handler");

        loop {
            tokio::select! {
                _ = usr1.recv() => {
                    tracing::warn!("SIGUSR1 received, draining");
                    task_token.cancel();
                    tokio::spawn(async move {
                        tokio::time::sleep(DRAIN_GRACE).await;
                        tracing::error!("drain grace period elapsed, exiting");
                        std::process::exit(0);
                    });
                }
                _ = alrm.recv() => {
                    tracing::error!("SIGALRM received, exiting immediately");
                    std::process::exit(1);
                }
                _ = term.recv() => {
                    tracing::error!("SIGTERM received, exiting immediately");
                    std::process::exit(0);
                }
                _ = hup.recv() => {
                    tracing::info!("SIGHUP received, reloading config from {}", config_path.display());
                    match GatewayConfig::load(&config_path) {
                        Ok(new) => config.store(Arc::new(new)),
                        Err(e) => tracing::error!("config reload failed, keeping current snapshot: {e}"),
                    }
                }
            }
        }
    });

    shutdown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_returns_a_live_unset_token() {
        let token = spawn(
            PathBuf::from("/nonexistent.toml"),
            Arc::new(ArcSwap::from_pointee(GatewayConfig::default())),
        );
        assert!(!token.is_cancelled());
    }
}
