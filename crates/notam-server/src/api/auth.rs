//! Bearer-token authentication for `/api/v1`

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use super::AppState;
use crate::db::tokens;
use crate::error::AppError;

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Reject requests without an active bearer token.
///
/// The token's `last_used_at` is touched in the background.
pub async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(request.headers())
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;

    let access = tokens::find_active(&state.pool, token)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid or inactive token".to_string()))?;

    tokens::touch_last_used(state.pool.clone(), access.id);
    debug!(token_name = %access.name, "Authenticated API request");

    Ok(next.run(request).await)
}
