//! NOTAM Server Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Consumes notices from a durable queue, stores them idempotently in
//! PostgreSQL and serves them over a small read API.
//!
//! # Overview
//!
//! - **Broker sessions** ([`broker`]): at-least-once delivery with
//!   acknowledgement; a Postgres-backed queue and an in-memory one
//! - **Ingestion** ([`ingest`]): the coordinator state machine, per-message
//!   ack policy, retention pruning and counters
//! - **Resilience** ([`resilience`]): circuit breaker over classified retry
//! - **Storage** ([`db`]): upsert on the notice identifier, filtered queries,
//!   pruning of expired notices
//! - **Read API** ([`api`]): bearer-protected listing and lookup
//!
//! # Message Flow
//!
//! ```text
//! queue -> coordinator -> parser -> guard(retry(store.upsert)) -> ack
//! ```
//!
//! Unparseable messages are acknowledged and dropped. Messages that could
//! not be stored, or arrived while the breaker was open, stay
//! unacknowledged and come back through redelivery.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use notam_server::{
//!     broker::InMemoryBroker,
//!     config::Config,
//!     db::{create_pool, PgNoticeStore},
//!     ingest::IngestionCoordinator,
//!     resilience::ResilienceGuard,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pool = create_pool(&config.database).await?;
//!     notam_server::migrate(&pool).await?;
//!
//!     let broker = InMemoryBroker::new();
//!     let coordinator = IngestionCoordinator::new(
//!         Arc::new(broker.clone()),
//!         Arc::new(PgNoticeStore::new(pool)),
//!         Arc::new(ResilienceGuard::new(
//!             config.resilience.breaker(),
//!             config.resilience.retry(),
//!         )),
//!         config.broker.queue.clone(),
//!     );
//!     coordinator.run(CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod middleware;
pub mod resilience;

// Re-export commonly used types
pub use error::{AppError, ServerError, ServerResult};

/// Apply the workspace migrations
pub async fn migrate(pool: &sqlx::PgPool) -> ServerResult<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}
