//! Shared helpers for notam-server integration tests

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notam_common::{Notice, NoticeFormat, Violation};
use notam_server::broker::{BrokerError, InMemoryBroker};
use notam_server::db::{DbError, DbResult, NoticeFilters, NoticeStore, StoredNotice, UpsertOutcome};
use notam_server::ingest::{CoordinatorState, IngestFault, IngestStats, IngestionCoordinator};
use notam_server::resilience::{BreakerConfig, ResilienceGuard, RetryConfig};
use parking_lot::Mutex;
use sqlx::types::Json;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const QUEUE: &str = "notam.inbound";

pub const LEGACY_A2_1234: &str =
    "A2/1234\nA) KJFK\nB) 2501151400\nC) 2501202359\nE) RWY 04L/22R CLSD";

/// Payload fixture shared with the parser crate
pub fn fixture(name: &str) -> Vec<u8> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../notam-ingest/tests/fixtures")
        .join(name);
    std::fs::read(&path).unwrap_or_else(|e| panic!("read {}: {e}", path.display()))
}

pub fn notice(identifier: &str, location: &str, start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Notice {
    Notice::builder(identifier, location, start, NoticeFormat::Text)
        .effective_end(end)
        .body(format!("{identifier} body"))
        .raw_payload(format!("{identifier}\nA) {location}"))
        .build()
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFault {
    /// Connection-class failure: retried, counts toward the breaker
    ConnectionRefused,
    /// Permanent failure: never retried, ignored by the breaker
    Rejected,
    Panic,
}

#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<String, StoredNotice>>,
    fault: Mutex<Option<StoreFault>>,
    upsert_calls: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_with(&self, fault: Option<StoreFault>) {
        *self.fault.lock() = fault;
    }

    pub fn upsert_calls(&self) -> u32 {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn stored(&self, identifier: &str) -> Option<StoredNotice> {
        self.rows.lock().get(identifier).cloned()
    }

    fn matches(row: &StoredNotice, filters: &NoticeFilters) -> bool {
        filters.location.as_ref().map_or(true, |l| &row.location == l)
            && filters
                .start
                .map_or(true, |s| row.effective_end.map_or(true, |end| end >= s))
            && filters.end.map_or(true, |e| row.effective_start <= e)
            && filters.purpose.as_ref().map_or(true, |p| row.purpose.as_ref() == Some(p))
            && filters.scope.as_ref().map_or(true, |s| row.scope.as_ref() == Some(s))
    }
}

#[async_trait]
impl NoticeStore for MemoryStore {
    async fn upsert(&self, notice: &Notice) -> DbResult<UpsertOutcome> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);

        let fault = *self.fault.lock();
        match fault {
            Some(StoreFault::ConnectionRefused) => {
                return Err(DbError::Sqlx(sqlx::Error::Io(io::Error::from(
                    io::ErrorKind::ConnectionRefused,
                ))));
            },
            Some(StoreFault::Rejected) => {
                return Err(DbError::Invalid(Violation::Empty("location").into()));
            },
            Some(StoreFault::Panic) => panic!("store exploded"),
            None => {},
        }

        notice.validate()?;

        let now = Utc::now();
        let mut rows = self.rows.lock();
        let existing = rows.get(&notice.identifier).map(|row| (row.id, row.created_at));
        let (id, created_at) = existing.unwrap_or((Uuid::new_v4(), now));

        let row = StoredNotice {
            id,
            identifier: notice.identifier.clone(),
            location: notice.location.clone(),
            effective_start: notice.effective_start,
            effective_end: notice.effective_end,
            schedule: notice.schedule.clone(),
            body: notice.body.clone(),
            qualifier: notice.qualifier.clone().map(Json),
            purpose: notice.purpose.clone(),
            scope: notice.scope.clone(),
            traffic_type: notice.traffic_type.clone(),
            source_format: notice.source_format.as_str().to_string(),
            raw_payload: notice.raw_payload.clone(),
            created_at,
            updated_at: now,
        };
        rows.insert(notice.identifier.clone(), row.clone());

        Ok(UpsertOutcome {
            notice: row,
            inserted: existing.is_none(),
        })
    }

    async fn get(&self, identifier: &str) -> DbResult<Option<StoredNotice>> {
        Ok(self.stored(identifier))
    }

    async fn query(&self, filters: &NoticeFilters) -> DbResult<Vec<StoredNotice>> {
        let mut rows: Vec<_> = self
            .rows
            .lock()
            .values()
            .filter(|row| Self::matches(row, filters))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.effective_start
                .cmp(&a.effective_start)
                .then_with(|| a.identifier.cmp(&b.identifier))
        });

        let offset = filters.offset.unwrap_or(0).max(0) as usize;
        let limit = filters.limit.unwrap_or(100).max(0) as usize;
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn count(&self, filters: &NoticeFilters) -> DbResult<i64> {
        let rows = self.rows.lock();
        Ok(rows.values().filter(|row| Self::matches(row, filters)).count() as i64)
    }

    async fn delete_expired(&self, retention_days: i32) -> DbResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
        let mut rows = self.rows.lock();
        let before = rows.len();
        rows.retain(|_, row| row.effective_end.map_or(true, |end| end >= cutoff));
        Ok((before - rows.len()) as u64)
    }
}

// ============================================================================
// Coordinator harness
// ============================================================================

/// Guard with fast retries for wall-clock tests
pub fn fast_guard(failure_threshold: u32, reset_timeout: Duration) -> ResilienceGuard {
    ResilienceGuard::new(
        BreakerConfig {
            failure_threshold,
            reset_timeout,
        },
        RetryConfig {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
    )
}

pub struct Harness {
    pub broker: InMemoryBroker,
    pub store: Arc<MemoryStore>,
    pub guard: Arc<ResilienceGuard>,
    pub stats: Arc<IngestStats>,
    pub faults: mpsc::Receiver<IngestFault>,
    pub state: watch::Receiver<CoordinatorState>,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<(), BrokerError>>,
}

impl Harness {
    /// Start a coordinator over an in-memory broker and wait until subscribed
    pub async fn start(guard: ResilienceGuard) -> Self {
        let broker = InMemoryBroker::new();
        let store = MemoryStore::new();
        let guard = Arc::new(guard);
        let stats = Arc::new(IngestStats::new());
        let (fault_tx, faults) = mpsc::channel(64);

        let coordinator = IngestionCoordinator::new(
            Arc::new(broker.clone()),
            store.clone(),
            Arc::clone(&guard),
            QUEUE,
        )
        .with_stats(Arc::clone(&stats))
        .with_fault_channel(fault_tx);
        let mut state = coordinator.watch_state();

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { coordinator.run(shutdown).await }
        });

        state
            .wait_for(|s| *s == CoordinatorState::Subscribed)
            .await
            .expect("coordinator subscribed");

        Self {
            broker,
            store,
            guard,
            stats,
            faults,
            state,
            shutdown,
            handle,
        }
    }

    /// Wait until the coordinator has finished handling `n` deliveries
    pub async fn wait_for_received(&mut self, n: u64) {
        let stats = Arc::clone(&self.stats);
        wait_until(|| stats.snapshot().received >= n).await;
        self.state
            .wait_for(|s| *s == CoordinatorState::Subscribed)
            .await
            .expect("coordinator idle");
    }

    pub async fn stop(self) -> Result<(), BrokerError> {
        self.shutdown.cancel();
        self.handle.await.expect("coordinator task")
    }
}

/// Poll `condition` until it holds, failing the test after five seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
