//! Notice persistence
//!
//! The `identifier` column is the business key: re-ingesting a notice
//! overwrites every mutable column of the existing row instead of creating a
//! new one, which makes redelivered messages harmless.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notam_common::{Notice, Qualifier};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow, PgPool, Postgres, QueryBuilder};
use tracing::debug;
use uuid::Uuid;

use super::{DbError, DbResult};

/// Page size used when a query does not specify one
pub const DEFAULT_QUERY_LIMIT: i64 = 100;

const NOTICE_COLUMNS: &str = "id, identifier, location, effective_start, effective_end, schedule, \
     body, qualifier, purpose, scope, traffic_type, source_format, raw_payload, \
     created_at, updated_at";

/// A notice as persisted, including store-managed fields
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StoredNotice {
    pub id: Uuid,
    pub identifier: String,
    pub location: String,
    pub effective_start: DateTime<Utc>,
    pub effective_end: Option<DateTime<Utc>>,
    pub schedule: Option<String>,
    pub body: String,
    pub qualifier: Option<Json<Qualifier>>,
    pub purpose: Option<String>,
    pub scope: Option<String>,
    pub traffic_type: Option<String>,
    pub source_format: String,
    /// Delivered bytes, kept for audit and reprocessing; omitted from JSON
    #[serde(skip)]
    pub raw_payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of an upsert: the stored row and whether it was newly created
#[derive(Debug, Clone, FromRow)]
pub struct UpsertOutcome {
    #[sqlx(flatten)]
    pub notice: StoredNotice,
    pub inserted: bool,
}

/// Composable query predicates; every `None` is "no constraint"
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoticeFilters {
    pub location: Option<String>,
    /// Lower bound of the time window; permanent notices always overlap it
    pub start: Option<DateTime<Utc>>,
    /// Upper bound of the time window
    pub end: Option<DateTime<Utc>>,
    pub purpose: Option<String>,
    pub scope: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl NoticeFilters {
    fn push_predicates(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push(" WHERE TRUE");
        if let Some(location) = &self.location {
            qb.push(" AND location = ").push_bind(location.clone());
        }
        if let Some(start) = self.start {
            qb.push(" AND (effective_end IS NULL OR effective_end >= ")
                .push_bind(start)
                .push(")");
        }
        if let Some(end) = self.end {
            qb.push(" AND effective_start <= ").push_bind(end);
        }
        if let Some(purpose) = &self.purpose {
            qb.push(" AND purpose = ").push_bind(purpose.clone());
        }
        if let Some(scope) = &self.scope {
            qb.push(" AND scope = ").push_bind(scope.clone());
        }
    }
}

/// Idempotent notice storage
#[async_trait]
pub trait NoticeStore: Send + Sync {
    /// Insert, or overwrite every mutable field of the row with the same identifier
    async fn upsert(&self, notice: &Notice) -> DbResult<UpsertOutcome>;

    async fn get(&self, identifier: &str) -> DbResult<Option<StoredNotice>>;

    /// Matching notices, newest effective start first
    async fn query(&self, filters: &NoticeFilters) -> DbResult<Vec<StoredNotice>>;

    /// Total matches for `filters`, ignoring limit and offset
    async fn count(&self, filters: &NoticeFilters) -> DbResult<i64>;

    /// Remove notices whose end is older than `retention_days`; permanent
    /// notices are never removed. Returns the number of rows deleted.
    async fn delete_expired(&self, retention_days: i32) -> DbResult<u64>;
}

/// Postgres-backed [`NoticeStore`]
#[derive(Debug, Clone)]
pub struct PgNoticeStore {
    pool: PgPool,
}

impl PgNoticeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl NoticeStore for PgNoticeStore {
    async fn upsert(&self, notice: &Notice) -> DbResult<UpsertOutcome> {
        notice.validate()?;

        let outcome = sqlx::query_as::<_, UpsertOutcome>(&format!(
            r#"
            INSERT INTO notices (
                identifier, location, effective_start, effective_end, schedule,
                body, qualifier, purpose, scope, traffic_type, source_format, raw_payload
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (identifier) DO UPDATE SET
                location = EXCLUDED.location,
                effective_start = EXCLUDED.effective_start,
                effective_end = EXCLUDED.effective_end,
                schedule = EXCLUDED.schedule,
                body = EXCLUDED.body,
                qualifier = EXCLUDED.qualifier,
                purpose = EXCLUDED.purpose,
                scope = EXCLUDED.scope,
                traffic_type = EXCLUDED.traffic_type,
                source_format = EXCLUDED.source_format,
                raw_payload = EXCLUDED.raw_payload,
                updated_at = NOW()
            RETURNING {NOTICE_COLUMNS}, (xmax = 0) AS inserted
            "#
        ))
        .bind(&notice.identifier)
        .bind(&notice.location)
        .bind(notice.effective_start)
        .bind(notice.effective_end)
        .bind(&notice.schedule)
        .bind(&notice.body)
        .bind(notice.qualifier.as_ref().map(Json))
        .bind(&notice.purpose)
        .bind(&notice.scope)
        .bind(&notice.traffic_type)
        .bind(notice.source_format.as_str())
        .bind(&notice.raw_payload)
        .fetch_one(&self.pool)
        .await?;

        debug!(
            identifier = %notice.identifier,
            id = %outcome.notice.id,
            inserted = outcome.inserted,
            "Upserted notice"
        );

        Ok(outcome)
    }

    async fn get(&self, identifier: &str) -> DbResult<Option<StoredNotice>> {
        let notice = sqlx::query_as::<_, StoredNotice>(&format!(
            "SELECT {NOTICE_COLUMNS} FROM notices WHERE identifier = $1"
        ))
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;

        Ok(notice)
    }

    async fn query(&self, filters: &NoticeFilters) -> DbResult<Vec<StoredNotice>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {NOTICE_COLUMNS} FROM notices"));
        filters.push_predicates(&mut qb);
        qb.push(" ORDER BY effective_start DESC, identifier ASC LIMIT ")
            .push_bind(filters.limit.unwrap_or(DEFAULT_QUERY_LIMIT).max(0))
            .push(" OFFSET ")
            .push_bind(filters.offset.unwrap_or(0).max(0));

        let notices = qb.build_query_as::<StoredNotice>().fetch_all(&self.pool).await?;

        debug!(count = notices.len(), "Queried notices");

        Ok(notices)
    }

    async fn count(&self, filters: &NoticeFilters) -> DbResult<i64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM notices");
        filters.push_predicates(&mut qb);

        let total = qb.build_query_scalar::<i64>().fetch_one(&self.pool).await?;
        Ok(total)
    }

    async fn delete_expired(&self, retention_days: i32) -> DbResult<u64> {
        if retention_days < 0 {
            return Err(DbError::config("retention days cannot be negative"));
        }

        let result = sqlx::query(
            r#"
            DELETE FROM notices
            WHERE effective_end IS NOT NULL
              AND effective_end < NOW() - make_interval(days => $1)
            "#,
        )
        .bind(retention_days)
        .execute(&self.pool)
        .await?;

        debug!(
            retention_days,
            deleted = result.rows_affected(),
            "Pruned expired notices"
        );

        Ok(result.rows_affected())
    }
}
