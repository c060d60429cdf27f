use fleetgate::api::{ApiServer, PKG_NAME, VERSION};
use fleetgate::config::Config;
use fleetgate::events::EventBus;
use fleetgate::lifecycle::LifecycleController;
use fleetgate::registry::Registry;
use fleetgate::reload::{FileProxyBackend, ProxyBackend, ReloadCoordinator};
use fleetgate::runtime::{ContainerRuntime, DockerRuntime};
use fleetgate::store::SqliteStore;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fleetgate=debug".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = if config_path.exists() {
        let config = Config::load(&config_path).map_err(|e| {
            error!(path = %config_path.display(), error = %e, "Failed to load configuration");
            e
        })?;
        info!(path = %config_path.display(), "Configuration loaded");
        config
    } else {
        info!(path = %config_path.display(), "No config file found, using defaults");
        Config::default()
    };

    info!(
        name = PKG_NAME,
        version = VERSION,
        api_port = config.server.port,
        proxy_config = %config.proxy.config_path,
        reconcile_interval_secs = config.reconcile.interval_secs,
        "Starting control plane"
    );

    // Shared plumbing
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let events = EventBus::new();

    // Persistence and registry
    let store = Arc::new(SqliteStore::open(&config.storage.db_path)?);
    let registry = Arc::new(Registry::new(
        store,
        events.clone(),
        config.ports.clone(),
    ));
    let loaded = registry.load().await?;
    info!(servers = loaded, "Fleet state restored");

    // Container runtime
    let runtime: Arc<dyn ContainerRuntime> =
        Arc::new(DockerRuntime::connect(config.docker.host.as_deref()).await?);

    // Lifecycle controller and reconciler
    let controller = Arc::new(LifecycleController::new(
        Arc::clone(&registry),
        runtime,
        events.clone(),
        config.docker.clone(),
        config.reconcile.clone(),
    ));
    let reconcile_handle = tokio::spawn(
        Arc::clone(&controller).run_reconcile_loop(config.reconcile.interval(), shutdown_rx.clone()),
    );

    // Proxy reload coordinator; apply the current fleet state once at
    // startup so the proxy config matches the restored registry.
    let proxy: Arc<dyn ProxyBackend> = Arc::new(FileProxyBackend::new(
        &config.proxy.config_path,
        config.proxy.reload_command.as_deref(),
    )?);
    let coordinator = Arc::new(ReloadCoordinator::new(
        Arc::clone(&registry),
        proxy,
        config.proxy.clone(),
    ));
    if let Err(e) = coordinator.force_resync().await {
        error!(error = %e, "Initial proxy sync failed, continuing with stale config");
    }
    let coordinator_handle = coordinator.spawn(&events, shutdown_rx.clone());

    // Control API
    let api_addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid API bind address: {}", e))?;
    let api = Arc::new(ApiServer::new(
        api_addr,
        Arc::clone(&registry),
        Arc::clone(&controller),
        Arc::clone(&coordinator),
        events.clone(),
        shutdown_rx.clone(),
    ));
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api.run().await {
            error!(error = %e, "Control API error");
        }
    });

    // Wait for shutdown signal
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }

    // Signal shutdown and drain in-flight work
    let _ = shutdown_tx.send(true);

    info!("Draining in-flight lifecycle operations...");
    controller.drain(Duration::from_secs(30)).await;

    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = reconcile_handle.await;
        let _ = coordinator_handle.await;
        let _ = api_handle.await;
    })
    .await;

    info!("Shutdown complete");
    Ok(())
}
