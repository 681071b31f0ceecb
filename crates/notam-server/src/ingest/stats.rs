//! Ingestion counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct IngestStats {
    received: AtomicU64,
    inserted: AtomicU64,
    updated: AtomicU64,
    unparseable: AtomicU64,
    deferred: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
}

/// Serializable view of [`IngestStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub inserted: u64,
    /// Re-ingestion of an identifier already stored
    pub updated: u64,
    pub unparseable: u64,
    /// Left unacknowledged because the breaker denied admission
    pub deferred: u64,
    pub failed: u64,
    pub panicked: u64,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stored(&self, inserted: bool) {
        if inserted {
            self.inserted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.updated.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_unparseable(&self) {
        self.unparseable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deferred(&self) {
        self.deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_panic(&self) {
        self.panicked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            inserted: self.inserted.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            unparseable: self.unparseable.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
        }
    }
}
