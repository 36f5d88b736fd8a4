//! Graceful shutdown handling
//!
//! A signal flips one cancellation token; the HTTP server, the sweeper and
//! the informer manager all hang off it.

use crate::kubernetes::informer::ClusterInformerManager;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shutdown coordinator for graceful termination
#[derive(Clone)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator with default 30s timeout
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            timeout,
        }
    }

    /// Token cancelled once shutdown starts
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Initiate graceful shutdown
    pub fn shutdown(&self) {
        if self.token.is_cancelled() {
            return;
        }
        info!("Initiating graceful shutdown...");
        self.token.cancel();
    }

    /// Wait for a termination signal from the OS, then start shutdown
    pub async fn wait_for_signal(&self) {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            match (
                signal(SignalKind::terminate()),
                signal(SignalKind::interrupt()),
            ) {
                (Ok(mut sigterm), Ok(mut sigint)) => {
                    tokio::select! {
                        _ = sigterm.recv() => info!("Received SIGTERM"),
                        _ = sigint.recv() => info!("Received SIGINT"),
                        _ = self.token.cancelled() => {}
                    }
                }
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error = %e, "Failed to register signal handlers, falling back to Ctrl+C");
                    self.wait_for_ctrl_c().await;
                }
            }
        }

        #[cfg(not(unix))]
        self.wait_for_ctrl_c().await;

        self.shutdown();
    }

    async fn wait_for_ctrl_c(&self) {
        tokio::select! {
            res = tokio::signal::ctrl_c() => match res {
                Ok(()) => info!("Received Ctrl+C"),
                Err(e) => warn!(error = %e, "Failed to listen for Ctrl+C"),
            },
            _ = self.token.cancelled() => {}
        }
    }

    /// Future resolving once shutdown starts, for axum's graceful shutdown
    pub fn signal(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let token = self.token.clone();
        async move { token.cancelled().await }
    }

    /// Stop every cluster cache and background task, bounded by the timeout
    pub async fn drain(&self, manager: &ClusterInformerManager, tasks: Vec<(&'static str, JoinHandle<()>)>) {
        info!("Starting graceful shutdown sequence...");

        let cleanup = async {
            manager.shutdown().await;
            for (name, handle) in tasks {
                match handle.await {
                    Ok(()) => info!("Task '{}' stopped gracefully", name),
                    Err(e) => warn!("Task '{}' failed: {}", name, e),
                }
            }
        };

        match timeout(self.timeout, cleanup).await {
            Ok(()) => info!("Shutdown complete"),
            Err(_) => warn!(
                "Cleanup did not complete within {:?}, forcing exit",
                self.timeout
            ),
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
