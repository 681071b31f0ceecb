//! Access tokens for the read API

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::DbResult;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AccessToken {
    pub id: Uuid,
    pub name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Look up an active token by its value
pub async fn find_active(pool: &PgPool, token: &str) -> DbResult<Option<AccessToken>> {
    let record = sqlx::query_as::<_, AccessToken>(
        r#"
        SELECT id, name, active, created_at, last_used_at
        FROM access_tokens
        WHERE token = $1 AND active
        "#,
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Register a token
pub async fn create(pool: &PgPool, name: &str, token: &str) -> DbResult<AccessToken> {
    let record = sqlx::query_as::<_, AccessToken>(
        r#"
        INSERT INTO access_tokens (name, token)
        VALUES ($1, $2)
        RETURNING id, name, active, created_at, last_used_at
        "#,
    )
    .bind(name)
    .bind(token)
    .fetch_one(pool)
    .await?;

    Ok(record)
}

/// Record token usage in the background.
///
/// The request that triggered it never waits on, or fails because of, this
/// write; errors are only logged.
pub fn touch_last_used(pool: PgPool, id: Uuid) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = sqlx::query("UPDATE access_tokens SET last_used_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&pool)
            .await;

        if let Err(e) = result {
            tracing::warn!(token_id = %id, error = %e, "Failed to update token last_used_at");
        }
    })
}
