use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use reelforge_api::backends::build_registry;
use reelforge_api::config::{RenderConfig, ServerConfig};
use reelforge_api::router::build_app_router;
use reelforge_api::state::AppState;
use reelforge_db::repositories::{BatchRepository, InMemoryBatchRepo, PgBatchRepo};
use reelforge_events::EventBus;
use reelforge_pipeline::{JobOrchestrator, OrchestratorConfig, PollingScheduler, SchedulerConfig};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "reelforge_api=debug,reelforge_pipeline=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    let render_config = RenderConfig::from_env();
    let orchestrator_config = OrchestratorConfig::from_env();
    let scheduler_config = SchedulerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Storage ---
    let repo: Arc<dyn BatchRepository> = match &config.database_url {
        Some(database_url) => {
            let pool = reelforge_db::create_pool(database_url)
                .await
                .expect("Failed to connect to database");
            tracing::info!("Database connection pool created");

            reelforge_db::health_check(&pool)
                .await
                .expect("Database health check failed");

            reelforge_db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("Database migrations applied");

            Arc::new(PgBatchRepo::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; batches are kept in memory only");
            Arc::new(InMemoryBatchRepo::new())
        }
    };

    // --- Render backends ---
    let registry = build_registry(&render_config).expect("Invalid render backend configuration");

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());
    let event_log_handle = tokio::spawn(log_events(event_bus.subscribe()));

    // --- Orchestrator ---
    let orchestrator = Arc::new(JobOrchestrator::new(
        registry,
        repo,
        Arc::clone(&event_bus),
        orchestrator_config,
    ));
    match orchestrator.restore().await {
        Ok(count) => tracing::info!(batches = count, "Active batches restored"),
        Err(e) => tracing::error!(error = %e, "Failed to restore active batches"),
    }

    // --- Polling scheduler ---
    let scheduler_cancel = CancellationToken::new();
    let scheduler = PollingScheduler::new(Arc::clone(&orchestrator), scheduler_config);
    let scheduler_token = scheduler_cancel.clone();
    let scheduler_handle = tokio::spawn(async move {
        scheduler.run(scheduler_token).await;
    });

    // --- App state ---
    let state = AppState {
        orchestrator,
        config: Arc::new(config.clone()),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    let grace = Duration::from_secs(config.shutdown_timeout_secs);

    scheduler_cancel.cancel();
    let _ = tokio::time::timeout(grace, scheduler_handle).await;
    tracing::info!("Polling scheduler stopped");

    // The logger ends once the last bus handle (ours or the orchestrator's) is gone.
    drop(event_bus);
    let _ = tokio::time::timeout(grace, event_log_handle).await;

    tracing::info!("Graceful shutdown complete");
}

/// Mirror lifecycle events into the log until the bus is closed.
async fn log_events(mut rx: tokio::sync::broadcast::Receiver<reelforge_events::BatchEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                tracing::debug!(
                    event_type = %event.event_type,
                    batch_id = %event.batch_id,
                    job_id = ?event.job_id,
                    status = ?event.status,
                    "Batch event",
                );
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event logger lagged behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
