use coldfront::config::Config;
use coldfront::gateway::ForwardingGateway;
use coldfront::lifecycle::{HttpLifecycleAdapter, LifecycleAdapter};
use coldfront::server::GatewayServer;
use coldfront::watcher::EventStreamWatcher;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("coldfront=debug".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration (optional; defaults apply when the file is absent)
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
        info!(path = %config_path.display(), "No configuration file, using defaults");
        Config::default()
    };

    info!(
        bind = %config.server.bind,
        port = config.server.port,
        backend = %config.backend.addr,
        control = %config.backend.control_addr,
        event_path = %config.backend.event_path,
        "Starting forwarding layer"
    );

    let adapter = Arc::new(HttpLifecycleAdapter::new(
        config.backend.addr.clone(),
        config.backend.control_addr.clone(),
    ));

    // Hand the one-time environment snapshot to the lifecycle manager so
    // the backend starts with it on the next cold start. Best-effort.
    let handle = adapter.resolve(
        &config.backend.instance_name,
        config.backend.placement_hint.as_deref(),
    );
    let env = config.backend.env_snapshot();
    info!(vars = env.len(), "Registering backend environment");
    adapter.register_environment(&handle, &env).await;

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Spawn the event stream watcher as a detached background task; it
    // runs for the life of the process and startup must not wait on it
    let watcher = EventStreamWatcher::new(
        Arc::clone(&adapter),
        config.backend.instance_name.clone(),
        config.backend.placement_hint.clone(),
        config.backend.event_path.clone(),
        shutdown_rx.clone(),
    );
    tokio::spawn(watcher.run());

    let gateway = Arc::new(ForwardingGateway::new(
        adapter,
        config.backend.instance_name.clone(),
        config.backend.placement_hint.clone(),
    ));

    let bind_addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .map_err(|e| {
            error!(bind = %config.server.bind, port = config.server.port, error = %e, "Invalid bind address");
            anyhow::anyhow!("Invalid bind address: {}", e)
        })?;

    let server = GatewayServer::new(bind_addr, gateway, shutdown_rx.clone());
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "Gateway server error");
        }
    });

    // Wait for shutdown signal (Ctrl+C or SIGTERM)
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

    // Signal shutdown and wait briefly for the server to drain
    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), server_handle).await;

    info!("Shutdown complete");
    Ok(())
}
