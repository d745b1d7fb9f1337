use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;

mod handlers;
mod routes;
mod state;

use common::config::Settings;
use common::db::{DbPool, ExecutionRepository, TriggerRepository};
use common::gateway::HttpFlowGateway;
use common::processors::email::NetworkConnector;
use common::telemetry;
use common::TriggerService;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Settings::load().context("Failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    // Initialize tracing
    telemetry::init_logging(
        &config.observability.log_level,
        config.observability.tracing_endpoint.as_deref(),
    )?;

    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        "Starting trigger API server"
    );

    let metrics_handle = telemetry::init_metrics()?;

    // Initialize database connection pool
    let db_pool = DbPool::new(&config.database).await?;
    if config.database.run_migrations {
        db_pool.run_migrations().await?;
    } else {
        tracing::info!("Database migrations skipped by configuration");
    }

    let gateway = HttpFlowGateway::new(&config.gateway)?;
    tracing::info!(base_url = %config.gateway.base_url, "Flow execution gateway configured");

    let service = TriggerService::new(
        Arc::new(TriggerRepository::new(db_pool.clone())),
        Arc::new(ExecutionRepository::new(db_pool.clone())),
        Arc::new(gateway),
        &config.engine,
        Arc::new(NetworkConnector),
    );
    let armed = service.start().await?;
    tracing::info!(armed, "Enabled triggers armed");

    // Create router
    let app = routes::create_router(
        AppState::new(service.clone(), metrics_handle),
        &config.engine.webhook_base_path,
    );

    // Start server
    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));
    tracing::info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Disarm everything before the pool goes away
    service.stop().await;
    db_pool.close().await;
    telemetry::shutdown_tracer();

    tracing::info!("API server stopped");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Initiating graceful shutdown");
}
