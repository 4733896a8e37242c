//! HTTP server lifecycle.
//!
//! Opens the database, wires the service into the API router and serves it
//! until the shutdown token is cancelled. In-flight requests are allowed to
//! finish before `serve` returns.

use crate::config::Config;
use crate::db::{self, DbError};
use crate::error::AppError;
use crate::services::assignment::AssignmentService;
use crate::services::http_api::{api_routes, ApiErr, ApiState};
use crate::storage::sqlite::SqliteStorage;
use axum::extract::Request;
use axum::http::{HeaderValue, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::net::SocketAddr;
use std::time::Instant;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use uuid::Uuid;

/// Header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Database initialization failed: {0}")]
    Database(#[from] DbError),

    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Build the full application router with logging and panic recovery.
pub fn build_router(state: ApiState) -> Router {
    api_routes()
        .fallback(not_found)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(log_requests))
                .layer(CatchPanicLayer::new()),
        )
}

/// Initialize storage from `config` and serve until `shutdown` fires.
pub async fn run(config: &Config, shutdown: CancellationToken) -> Result<(), ServerError> {
    let pool = db::initialize(&config.database_path, &config.pool_settings()).await?;
    log::info!("[server] Database ready at {}", config.database_path.display());

    let service = AssignmentService::new(SqliteStorage::new(pool.clone()));
    let state = ApiState::new(service, shutdown.clone(), config.request_timeout);

    let addr = config.http_addr;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;

    let result = serve(listener, state, shutdown).await;
    pool.close().await;
    result
}

/// Serve the API on an already bound listener.
pub async fn serve(
    listener: TcpListener,
    state: ApiState,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("[server] Listening on http://{}", addr);
    }

    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        })
        .await
        .map_err(ServerError::Serve)?;

    log::info!("[server] Stopped");
    Ok(())
}

/// Log one line per request and echo or assign a request id.
async fn log_requests(request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started = Instant::now();

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    log::info!(
        "[{}] {} {} -> {} ({} ms)",
        request_id,
        method,
        path,
        response.status().as_u16(),
        started.elapsed().as_millis()
    );

    response
}

async fn not_found(uri: Uri) -> Response {
    ApiErr::from(AppError::not_found(format!("route {}", uri.path()))).into_response()
}
