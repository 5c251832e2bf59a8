use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docpipe_api::config::ServerConfig;
use docpipe_api::{background, router, state, ws};
use docpipe_events::{ConnectionRegistry, StatusBroadcaster};
use docpipe_worker::Executor;

use state::AppState;

/// How long shutdown waits for in-flight jobs before giving up.
const EXECUTOR_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "docpipe_api=debug,docpipe_worker=debug,docpipe_events=debug,tower_http=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let pool = docpipe_db::create_pool(&config.database_url)
        .await
        .expect("Failed to open job store");
    tracing::info!("Database connection pool created");

    docpipe_db::health_check(&pool)
        .await
        .expect("Database health check failed");

    docpipe_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Delivery ---
    let registry = Arc::new(ConnectionRegistry::new());
    let heartbeat_handle = ws::start_heartbeat(Arc::clone(&registry));
    let broadcaster = StatusBroadcaster::new(pool.clone(), Arc::clone(&registry));

    // --- Executor ---
    tokio::fs::create_dir_all(&config.worker.output_root)
        .await
        .expect("Failed to create JOB_OUTPUT_ROOT");

    let executor = Arc::new(Executor::new(
        pool.clone(),
        broadcaster,
        config.worker.clone(),
    ));
    executor
        .recover_orphans()
        .await
        .expect("Failed to recover orphaned jobs");

    let executor_cancel = CancellationToken::new();
    let slot_handles = Arc::clone(&executor).spawn(executor_cancel.clone());

    // --- Retention ---
    let retention_cancel = CancellationToken::new();
    let retention_handle = tokio::spawn(background::job_retention::run(
        pool.clone(),
        config.retention.clone(),
        retention_cancel.clone(),
    ));

    // --- App state ---
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        registry: Arc::clone(&registry),
        queue_notify: executor.notifier(),
    };

    let app = router::build_app_router(state, &config);

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

    // Slots finish their current job before stopping.
    executor_cancel.cancel();
    let drain = futures::future::join_all(slot_handles);
    if tokio::time::timeout(EXECUTOR_DRAIN_TIMEOUT, drain).await.is_err() {
        tracing::warn!("Executor did not drain in time; running jobs will be failed on next start");
    }
    tracing::info!("Executor stopped");

    retention_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), retention_handle).await;

    let ws_count = registry.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    registry.shutdown_all().await;

    heartbeat_handle.abort();
    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
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
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
