use std::sync::Arc;

use docpipe_events::ConnectionRegistry;
use tokio::sync::Notify;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything inside is behind `Arc` or already `Clone`.
#[derive(Clone)]
pub struct AppState {
    pub pool: docpipe_db::DbPool,
    pub config: Arc<ServerConfig>,
    /// Live delivery channels of connected clients.
    pub registry: Arc<ConnectionRegistry>,
    /// Wakes an idle worker slot after a submission.
    pub queue_notify: Arc<Notify>,
}
