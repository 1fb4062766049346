use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;

use ara_connection_store::config::Settings;
use ara_connection_store::datastore::create_datastore;
use ara_connection_store::redis::{BackoffConfig, RedisPool};
use ara_connection_store::server::{create_app, AppState};
use ara_connection_store::store::Store;
use ara_connection_store::telemetry::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing
    init_tracing(&settings.logging)?;
    tracing::info!("Configuration loaded");

    // Datastore
    let redis_pool = if settings.store.backend == "memory" {
        None
    } else {
        let pool = Arc::new(RedisPool::from_config(&settings.redis)?);
        // The bus subscribes during start, so Redis must be reachable at boot
        if let Err(e) = pool.ping().await {
            tracing::error!(error = %e, url = %pool.url(), "Redis not reachable");
            return Err(e.into());
        }
        Some(pool)
    };
    let datastore = create_datastore(&settings.store, redis_pool.clone());

    // Store
    let store = Store::with_backoff(
        settings.store_config(),
        datastore,
        BackoffConfig::from(&settings.redis),
    )?;
    store.start().await?;

    // Create Axum app
    let state = AppState::new(settings.clone(), store.clone(), redis_pool);
    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Ops API listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler())
        .await?;

    store.shutdown().await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
