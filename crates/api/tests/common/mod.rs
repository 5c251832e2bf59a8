use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use docpipe_api::config::{RetentionConfig, ServerConfig};
use docpipe_api::router::build_app_router;
use docpipe_api::state::AppState;
use docpipe_db::DbPool;
use docpipe_events::ConnectionRegistry;
use docpipe_worker::WorkerConfig;
use http_body_util::BodyExt;
use tokio::sync::Notify;
use tower::ServiceExt;

/// Build a test `ServerConfig` writing job outputs under `output_root`.
pub fn test_config(output_root: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        database_url: "sqlite::memory:".to_string(),
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        retention: RetentionConfig::default(),
        worker: WorkerConfig {
            output_root: output_root.to_path_buf(),
            ..WorkerConfig::default()
        },
    }
}

/// Build the full application router plus the state behind it.
///
/// Uses the same middleware stack as `main.rs`.
pub fn build_test_app(pool: DbPool, output_root: &Path) -> (Router, AppState) {
    let config = test_config(output_root);
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        registry: Arc::new(ConnectionRegistry::new()),
        queue_notify: Arc::new(Notify::new()),
    };
    (build_app_router(state.clone(), &config), state)
}

pub async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

/// GET `uri` as `user` (no identity when `None`).
pub async fn get(app: &Router, uri: &str, user: Option<&str>) -> Response {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    send(app, builder.body(Body::empty()).unwrap()).await
}

/// POST a JSON body to `uri` as `user`.
pub async fn post_json(
    app: &Router,
    uri: &str,
    user: Option<&str>,
    body: serde_json::Value,
) -> Response {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    send(app, builder.body(Body::from(body.to_string())).unwrap()).await
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
