//! Serve command - runs the API server and both background sweeps

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::create_router;
use crate::api::state::AppState;
use crate::config::AppConfig;
use crate::infrastructure::api_key::SweepWorker;
use crate::infrastructure::logging;
use crate::infrastructure::observability::{create_metrics_router, init_metrics, PrometheusMetrics};

/// Run the API server until Ctrl+C or SIGTERM
pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    logging::init_logging(&config.logging)?;

    let components = crate::create_app_state_with_config(&config).await?;
    let metrics = init_metrics(&config.metrics);
    let shutdown = CancellationToken::new();

    let workers = vec![
        SweepWorker::start(
            components.rotation.clone(),
            Arc::clone(&components.clock),
            Duration::from_secs(config.rotation.sweep_interval_secs),
            &shutdown,
        ),
        SweepWorker::start(
            components.anomaly_scan.clone(),
            Arc::clone(&components.clock),
            Duration::from_secs(config.anomaly.scan_interval_secs),
            &shutdown,
        ),
    ];

    let store = Arc::clone(components.state.manager.store());
    let app = create_app(components.state, metrics, &config.metrics.path);

    let addr = build_socket_addr(&config)?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Starting API server on {}", addr);

    tokio::spawn(shutdown_signal(shutdown.clone()));

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.clone().cancelled_owned())
    .await;

    // The server may also stop on its own error
    shutdown.cancel();
    for worker in workers {
        worker.stop().await;
    }
    store.sync().await;

    served?;
    info!("API server shutdown complete");

    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = token.cancelled() => {}
    }

    token.cancel();
}

fn build_socket_addr(config: &AppConfig) -> anyhow::Result<SocketAddr> {
    Ok(SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    )))
}

/// API router plus the metrics endpoint when enabled
fn create_app(state: AppState, metrics: Option<PrometheusMetrics>, metrics_path: &str) -> Router {
    let router = create_router(state);

    match metrics {
        Some(metrics) => router.merge(create_metrics_router(metrics, metrics_path)),
        None => router,
    }
}
