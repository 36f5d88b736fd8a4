use anyhow::Context;
use fleetdeck_api::config::FleetdeckConfig;
use fleetdeck_api::kubernetes::{
    ClusterDirectory, ClusterInformerManager, FileClusterDirectory, KubeconfigConnectionFactory,
};
use fleetdeck_api::routes::{build_router, AppState};
use fleetdeck_api::shutdown::ShutdownCoordinator;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::args().nth(1).as_deref() == Some("--print-config") {
        print!("{}", FleetdeckConfig::generate_sample());
        return Ok(());
    }

    let config = FleetdeckConfig::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let _log_guard = config
        .logging
        .init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        clusters_file = %config.directory.clusters_file.display(),
        "Starting fleetdeck API"
    );

    let directory: Arc<dyn ClusterDirectory> =
        Arc::new(FileClusterDirectory::new(config.directory.clusters_file.clone()));
    let manager = Arc::new(
        ClusterInformerManager::new(
            Arc::new(KubeconfigConnectionFactory::new()),
            config.informer.clone(),
        )
        .with_directory(directory.clone()),
    );

    let shutdown = ShutdownCoordinator::new();
    let mut background = Vec::new();
    if let Some(interval) = config.informer.sweep_interval() {
        info!(interval_secs = interval.as_secs(), "Starting cluster sweeper");
        background.push((
            "cluster-sweeper",
            manager.spawn_sweeper(directory.clone(), interval, shutdown.token()),
        ));
    }

    let state = Arc::new(AppState {
        manager: manager.clone(),
        directory,
        shutdown: shutdown.token(),
    });
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Fleetdeck API listening on {}", addr);

    let signals = shutdown.clone();
    tokio::spawn(async move { signals.wait_for_signal().await });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.signal())
        .await?;

    info!("Server stopped, running cleanup...");
    shutdown.drain(&manager, background).await;

    Ok(())
}
