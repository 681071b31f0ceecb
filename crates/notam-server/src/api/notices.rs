//! Notice read routes
//!
//! - `GET /api/v1/notices` - filtered, paginated list
//! - `GET /api/v1/notices/{identifier}` - one notice by identifier
//!
//! Identifiers contain a slash (`A4146/2025`), so the lookup route takes the
//! rest of the path rather than a single segment.

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::response::{ApiResponse, PaginationMeta};
use super::AppState;
use crate::db::NoticeFilters;
use crate::error::AppError;

pub const DEFAULT_PER_PAGE: i64 = 20;
pub const MAX_PER_PAGE: i64 = 100;

pub fn notices_routes() -> Router<AppState> {
    Router::new()
        .route("/notices", get(list_notices))
        .route("/notices/*identifier", get(get_notice))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListNoticesQuery {
    pub location: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub purpose: Option<String>,
    pub scope: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl ListNoticesQuery {
    pub fn validate(&self) -> Result<(), AppError> {
        if matches!(self.page, Some(page) if page < 1) {
            return Err(AppError::Validation("page must be greater than 0".to_string()));
        }
        if matches!(self.per_page, Some(per_page) if !(1..=MAX_PER_PAGE).contains(&per_page)) {
            return Err(AppError::Validation(format!(
                "per_page must be between 1 and {MAX_PER_PAGE}"
            )));
        }
        if (self.page() - 1).checked_mul(self.per_page()).is_none() {
            return Err(AppError::Validation("page is out of range".to_string()));
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(AppError::Validation("start must not be after end".to_string()));
            }
        }
        Ok(())
    }

    fn page(&self) -> i64 {
        self.page.unwrap_or(1)
    }

    fn per_page(&self) -> i64 {
        self.per_page.unwrap_or(DEFAULT_PER_PAGE)
    }

    pub fn filters(&self) -> NoticeFilters {
        NoticeFilters {
            location: self.location.clone(),
            start: self.start,
            end: self.end,
            purpose: self.purpose.clone(),
            scope: self.scope.clone(),
            limit: Some(self.per_page()),
            offset: Some(self.page().saturating_sub(1).saturating_mul(self.per_page())),
        }
    }
}

#[tracing::instrument(
    skip(state, query),
    fields(location = ?query.location, page = ?query.page, per_page = ?query.per_page)
)]
async fn list_notices(
    State(state): State<AppState>,
    Query(query): Query<ListNoticesQuery>,
) -> Result<Response, AppError> {
    query.validate()?;
    let filters = query.filters();

    let (items, total) = tokio::join!(state.store.query(&filters), state.store.count(&filters));
    let (items, total) = (items?, total?);

    tracing::debug!(count = items.len(), total, "Notices listed via API");

    let meta = json!({
        "pagination": PaginationMeta::new(query.page(), query.per_page(), total)
    });
    Ok(ApiResponse::success_with_meta(items, meta).into_response())
}

#[tracing::instrument(skip(state))]
async fn get_notice(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Response, AppError> {
    let notice = state
        .store
        .get(&identifier)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Notice '{identifier}' not found")))?;

    Ok(ApiResponse::success(notice).into_response())
}
