//! Read API over stored notices
//!
//! `/health` and `/stats` are open; everything under `/api/v1` requires a
//! bearer token from the `access_tokens` table.

pub mod auth;
pub mod notices;
pub mod response;

use axum::{extract::State, middleware::from_fn_with_state, routing::get, Json, Router};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::compression::CompressionLayer;

use crate::config::CorsConfig;
use crate::db::{self, NoticeStore};
use crate::error::AppError;
use crate::ingest::{CoordinatorState, IngestStats};
use crate::middleware;
use crate::resilience::ResilienceGuard;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub store: Arc<dyn NoticeStore>,
    pub stats: Arc<IngestStats>,
    pub guard: Arc<ResilienceGuard>,
    /// Absent when ingestion is not running in this process
    pub coordinator: Option<watch::Receiver<CoordinatorState>>,
}

/// Build the router with all routes and middleware
pub fn create_router(state: AppState, cors: &CorsConfig) -> Router {
    let api_v1 = notices::notices_routes()
        .route_layer(from_fn_with_state(state.clone(), auth::require_bearer));

    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))
        .nest("/api/v1", api_v1)
        .with_state(state)
        // Apply layers from innermost to outermost
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(cors))
}

async fn health_check(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    if let Err(e) = db::health_check(&state.pool).await {
        tracing::error!("Database health check failed: {:?}", e);
        return Err(AppError::Unavailable("database unreachable".to_string()));
    }

    Ok(Json(json!({
        "status": "healthy",
        "database": "connected",
        "breaker": state.guard.breaker().state(),
    })))
}

async fn get_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let coordinator = state.coordinator.as_ref().map(|rx| *rx.borrow());

    Json(json!({
        "ingest": state.stats.snapshot(),
        "breaker": state.guard.breaker().snapshot(),
        "coordinator": coordinator,
    }))
}
