//! JSON HTTP API: login sessions, poll options, results, and voting.

pub mod auth;
pub mod cache;
pub mod error;
pub mod voting;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::Method;
use axum::routing::{get, post};
use axum::{Json, Router};
use tally_store::Database;
use tokio::task;
use tower_http::cors::CorsLayer;

pub use cache::ResultsCache;
pub use error::ApiError;

use crate::health::{health_check, HealthResponse};
use crate::websocket::BroadcastServer;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub db: Database,
    pub broadcast: Arc<BroadcastServer>,
    pub results_cache: Arc<ResultsCache>,
    pub session_max_age_secs: u64,
    pub start_time: Instant,
}

/// Build the HTTP API router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/session", get(auth::session))
        .route("/api/voting/options", get(voting::options))
        .route("/api/voting/results", get(voting::results))
        .route("/api/voting/vote", post(voting::vote))
        .route("/health", get(health_handler))
        .method_not_allowed_fallback(method_not_allowed)
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// GET /health
async fn health_handler(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(health_check(
        state.start_time,
        state.broadcast.connection_count(),
    ))
}

/// Run store work on the blocking pool; rusqlite calls never touch an async
/// worker thread.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Internal(format!("store task failed: {e}")))?
}

async fn method_not_allowed(method: Method) -> ApiError {
    ApiError::MethodNotAllowed {
        method: method.to_string(),
    }
}
