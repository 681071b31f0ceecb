//! Resilience layer: circuit breaker composed over a classified retry policy
//!
//! Call path: `breaker(retry(operation))`. A whole retry sequence counts as a
//! single outcome for the breaker, so an exhausted sequence of connection
//! failures is one qualifying failure.
//!
//! Each [`ResilienceGuard`] owns its own state; construct one per deployment
//! (or per test) and share it with `Arc`.

pub mod circuit_breaker;
pub mod classify;
pub mod retry;

pub use circuit_breaker::{BreakerConfig, BreakerSnapshot, BreakerState, CircuitBreaker, GuardError};
pub use classify::{
    is_connection_error, is_retriable, FailureClassifier, RetryClassifier, TransientErrors,
    TransientFailures,
};
pub use retry::{RetryConfig, RetryPolicy};

use std::error::Error;
use std::future::Future;

#[derive(Debug)]
pub struct ResilienceGuard {
    breaker: CircuitBreaker,
    retry: RetryPolicy,
}

impl ResilienceGuard {
    /// Guard with the default connection / transient classifiers
    pub fn new(breaker: BreakerConfig, retry: RetryConfig) -> Self {
        Self::from_parts(CircuitBreaker::new(breaker), RetryPolicy::new(retry))
    }

    pub fn from_parts(breaker: CircuitBreaker, retry: RetryPolicy) -> Self {
        Self { breaker, retry }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn is_request_allowed(&self) -> bool {
        self.breaker.is_request_allowed()
    }

    pub fn record_success(&self) {
        self.breaker.record_success();
    }

    pub fn record_failure(&self, error: &(dyn Error + 'static)) -> bool {
        self.breaker.record_failure(error)
    }

    /// Run `operation` with retries, behind the breaker.
    ///
    /// Fails with [`GuardError::CircuitOpen`] without invoking `operation`
    /// when admission is denied; otherwise returns the final result of the
    /// retry sequence, errors unchanged.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, GuardError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Error + 'static,
    {
        self.breaker
            .execute(|| self.retry.with_retry(operation))
            .await
    }
}
