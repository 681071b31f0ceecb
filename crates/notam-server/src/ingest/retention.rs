//! Scheduled pruning of expired notices
//!
//! Runs beside ingestion, never inside it. Each pass goes through the same
//! guard as the live path, so an outage that opened the breaker also pauses
//! pruning.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::RetentionConfig;
use crate::db::{DbError, NoticeStore};
use crate::resilience::{GuardError, ResilienceGuard};

pub struct RetentionTask {
    store: Arc<dyn NoticeStore>,
    guard: Arc<ResilienceGuard>,
    days: i32,
    interval: Duration,
}

impl RetentionTask {
    pub fn new(store: Arc<dyn NoticeStore>, guard: Arc<ResilienceGuard>, config: &RetentionConfig) -> Self {
        Self {
            store,
            guard,
            days: config.days,
            interval: Duration::from_secs(config.interval_secs),
        }
    }

    /// One guarded `delete_expired` pass
    pub async fn run_once(&self) -> Result<u64, GuardError<DbError>> {
        self.guard.execute(|| self.store.delete_expired(self.days)).await
    }

    /// Prune on every interval tick (the first immediately) until `shutdown`
    pub fn start(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                retention_days = self.days,
                interval_secs = self.interval.as_secs(),
                "Retention task started"
            );

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {},
                }

                match self.run_once().await {
                    Ok(0) => {},
                    Ok(deleted) => info!(deleted, retention_days = self.days, "Pruned expired notices"),
                    Err(GuardError::CircuitOpen) => warn!("Circuit open, skipping retention pass"),
                    Err(GuardError::Operation(e)) => error!(error = %e, "Retention pass failed"),
                }
            }

            info!("Retention task stopped");
        })
    }
}
