//! Failure-threshold circuit breaker
//!
//! Two states. A qualifying failure bumps the counter; reaching the threshold
//! opens the circuit. Once the reset timeout has elapsed since the last
//! qualifying failure, the next admission check closes it again with the
//! counter zeroed and lets the call through. There is no half-open trial
//! state.

use parking_lot::Mutex;
use serde::Serialize;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use super::classify::{FailureClassifier, TransientFailures};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakerState {
    /// Calls are admitted
    Closed,
    /// Calls fail fast until the reset timeout elapses
    Open,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Qualifying failures needed to open the circuit
    pub failure_threshold: u32,
    /// Time since the last qualifying failure before the circuit resets
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Error returned by guarded calls
#[derive(Debug)]
pub enum GuardError<E> {
    /// Admission denied; the operation was not invoked
    CircuitOpen,
    /// The operation's own error, unchanged
    Operation(E),
}

impl<E> GuardError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, GuardError::CircuitOpen)
    }

    pub fn into_operation(self) -> Option<E> {
        match self {
            GuardError::CircuitOpen => None,
            GuardError::Operation(e) => Some(e),
        }
    }
}

impl<E: fmt::Display> fmt::Display for GuardError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardError::CircuitOpen => write!(f, "circuit breaker is open"),
            GuardError::Operation(e) => e.fmt(f),
        }
    }
}

impl<E: Error + 'static> Error for GuardError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            GuardError::CircuitOpen => None,
            GuardError::Operation(e) => Some(e),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    open: bool,
    failure_count: u32,
    last_failure: Option<Instant>,
}

/// Point-in-time view for monitoring
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failure_count: u32,
    pub open_count: u64,
    pub rejected_count: u64,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    classifier: Box<dyn FailureClassifier>,
    inner: Mutex<BreakerInner>,
    /// Metrics: times circuit opened
    open_count: AtomicU64,
    /// Metrics: admission checks denied
    rejected_count: AtomicU64,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("inner", &*self.inner.lock())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Breaker that counts connection-class failures
    pub fn new(config: BreakerConfig) -> Self {
        Self::with_classifier(config, TransientFailures)
    }

    pub fn with_classifier(config: BreakerConfig, classifier: impl FailureClassifier + 'static) -> Self {
        Self {
            config,
            classifier: Box::new(classifier),
            inner: Mutex::new(BreakerInner {
                open: false,
                failure_count: 0,
                last_failure: None,
            }),
            open_count: AtomicU64::new(0),
            rejected_count: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> BreakerState {
        if self.inner.lock().open {
            BreakerState::Open
        } else {
            BreakerState::Closed
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn open_count(&self) -> u64 {
        self.open_count.load(Ordering::Relaxed)
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected_count.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            state: if inner.open {
                BreakerState::Open
            } else {
                BreakerState::Closed
            },
            failure_count: inner.failure_count,
            open_count: self.open_count(),
            rejected_count: self.rejected_count(),
        }
    }

    /// Admission check; may reset an open circuit whose timeout has elapsed
    pub fn is_request_allowed(&self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.open {
            return true;
        }

        let elapsed = inner
            .last_failure
            .map(|at| at.elapsed() >= self.config.reset_timeout)
            .unwrap_or(true);
        if elapsed {
            inner.open = false;
            inner.failure_count = 0;
            inner.last_failure = None;
            info!("Circuit breaker reset to closed after timeout");
            return true;
        }

        self.rejected_count.fetch_add(1, Ordering::Relaxed);
        false
    }

    /// Zero the failure counter. An open circuit stays open.
    pub fn record_success(&self) {
        self.inner.lock().failure_count = 0;
    }

    /// Record a failure if the classifier deems it qualifying.
    ///
    /// Returns whether it counted.
    pub fn record_failure(&self, error: &(dyn Error + 'static)) -> bool {
        if !self.classifier.is_qualifying(error) {
            return false;
        }
        self.record_qualifying_failure();
        true
    }

    /// Count a failure without consulting the classifier
    pub fn record_qualifying_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        if !inner.open && inner.failure_count >= self.config.failure_threshold {
            inner.open = true;
            self.open_count.fetch_add(1, Ordering::Relaxed);
            warn!(
                failures = inner.failure_count,
                reset_timeout_secs = self.config.reset_timeout.as_secs(),
                "Circuit breaker opened"
            );
        }
    }

    /// Run `operation` if admitted, recording its outcome
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Error + 'static,
    {
        if !self.is_request_allowed() {
            return Err(GuardError::CircuitOpen);
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            },
            Err(error) => {
                self.record_failure(&error);
                Err(GuardError::Operation(error))
            },
        }
    }
}
