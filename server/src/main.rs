//! Courtside reservation HTTP server.
//!
//! Wires the `PostgreSQL` store, the reservation engine, the hold expiry
//! reconciler and the Prometheus endpoint together, then serves the
//! reservation API until Ctrl+C or SIGTERM.

mod config;

use axum::{Router, http::StatusCode, routing::get};
use config::Config;
use courtside_core::environment::SystemClock;
use courtside_postgres::PostgresReservationStore;
use courtside_runtime::{
    HoldExpiryReconciler, MetricsServer, ReservationEngine, TracingNotifier,
};
use courtside_web::{AppState, build_router};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is normal outside development
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,courtside=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Courtside reservation server");

    let config = Config::from_env()?;
    info!(
        http = %config.http_addr(),
        metrics = %config.metrics_addr(),
        lock_timeout_ms = config.postgres.lock_timeout.as_millis(),
        "Configuration loaded"
    );

    // Metrics recorder must exist before the first counter is touched
    let mut metrics = MetricsServer::new(config.metrics_addr().parse()?);
    metrics.start()?;

    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .min_connections(config.postgres.min_connections)
        .acquire_timeout(config.postgres.connect_timeout)
        .connect(&config.postgres.url)
        .await?;
    let store = Arc::new(
        PostgresReservationStore::new(pool).with_lock_timeout(config.postgres.lock_timeout),
    );
    store.migrate().await?;
    info!("Database ready");

    let engine = Arc::new(ReservationEngine::new(
        Arc::clone(&store),
        Arc::new(SystemClock),
        Arc::new(TracingNotifier),
        config.engine.clone(),
    ));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let reconciler = HoldExpiryReconciler::new(Arc::clone(&engine), config.reconciler.clone())
        .spawn(shutdown_tx.subscribe());

    let metrics_task = spawn_metrics_endpoint(&metrics, shutdown_tx.subscribe()).await?;

    let app = build_router(AppState::new(engine));
    let listener = tokio::net::TcpListener::bind(config.http_addr()).await?;
    info!(address = %config.http_addr(), "HTTP server listening");

    let mut http_shutdown = shutdown_tx.subscribe();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown.recv().await;
            })
            .await
    });

    tokio::select! {
        () = shutdown_signal() => {}
        result = &mut server => {
            error!(?result, "HTTP server exited unexpectedly");
            let _ = shutdown_tx.send(());
            let _ = reconciler.await;
            return Err(anyhow::anyhow!("HTTP server exited unexpectedly"));
        }
    }

    let _ = shutdown_tx.send(());
    match tokio::time::timeout(config.server.shutdown_timeout, &mut server).await {
        Ok(Ok(Ok(()))) => info!("HTTP server stopped"),
        Ok(Ok(Err(e))) => error!(error = %e, "HTTP server failed during shutdown"),
        Ok(Err(e)) => error!(error = %e, "HTTP server task panicked"),
        Err(_) => {
            warn!(
                timeout_secs = config.server.shutdown_timeout.as_secs(),
                "Shutdown timeout elapsed, dropping open connections"
            );
            server.abort();
        }
    }

    if let Err(e) = reconciler.await {
        warn!(error = %e, "Reconciler task ended abnormally");
    }
    if let Some(task) = metrics_task {
        let _ = task.await;
    }
    store.pool().close().await;

    info!("Shutdown complete");
    Ok(())
}

/// Serve `GET /metrics` on the metrics address.
///
/// Returns `None` when another recorder was installed first and there is
/// nothing to render.
async fn spawn_metrics_endpoint(
    metrics: &MetricsServer,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<Option<tokio::task::JoinHandle<()>>> {
    let Some(handle) = metrics.handle().cloned() else {
        warn!("Metrics recorder not owned by this process, /metrics disabled");
        return Ok(None);
    };

    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { (StatusCode::OK, handle.render()) }
        }),
    );
    let listener = tokio::net::TcpListener::bind(metrics.addr()).await?;
    info!(address = %metrics.addr(), "Metrics endpoint listening");

    Ok(Some(tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await;
        if let Err(e) = result {
            error!(error = %e, "Metrics endpoint failed");
        }
    })))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
