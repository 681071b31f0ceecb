//! Classified retry with capped exponential backoff

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use super::classify::{RetryClassifier, TransientErrors};

/// Configuration for retry backoff
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 = single attempt)
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (0-indexed): `min(base * 2^retry, max)`
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

pub struct RetryPolicy {
    config: RetryConfig,
    classifier: Box<dyn RetryClassifier>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// Policy retrying connection failures and transient driver codes
    pub fn new(config: RetryConfig) -> Self {
        Self::with_classifier(config, TransientErrors)
    }

    pub fn with_classifier(config: RetryConfig, classifier: impl RetryClassifier + 'static) -> Self {
        Self {
            config,
            classifier: Box::new(classifier),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation`, retrying retriable failures.
    ///
    /// Non-retriable errors return after one attempt; retriable ones after at
    /// most `max_retries + 1` attempts. The last error is returned unchanged.
    pub async fn with_retry<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Error + 'static,
    {
        let mut retry = 0;
        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if retry >= self.config.max_retries || !self.classifier.is_retriable(&error) {
                return Err(error);
            }

            let delay = self.config.delay_for_retry(retry);
            debug!(
                attempt = retry + 1,
                max_retries = self.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after transient failure"
            );
            drop(error);

            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }
}
