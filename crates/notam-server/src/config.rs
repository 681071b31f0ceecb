//! Configuration management

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::resilience::{BreakerConfig, RetryConfig};

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/notam";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

// ============================================================================
// Broker Configuration Constants
// ============================================================================

/// Default queue the coordinator subscribes to.
pub const DEFAULT_BROKER_QUEUE: &str = "notam.inbound";

/// Default delay between empty polls of the queue table.
pub const DEFAULT_BROKER_POLL_INTERVAL_MS: u64 = 500;

/// Default time an unacknowledged delivery stays invisible before redelivery.
pub const DEFAULT_BROKER_VISIBILITY_TIMEOUT_SECS: u64 = 30;

/// Default number of deliveries handed out but not yet acknowledged.
pub const DEFAULT_BROKER_MAX_IN_FLIGHT: usize = 1;

/// Default reconnection attempts before the session reports disconnect.
pub const DEFAULT_BROKER_RECONNECT_ATTEMPTS: u32 = 10;

/// Default fixed wait between reconnection attempts.
pub const DEFAULT_BROKER_RECONNECT_WAIT_MS: u64 = 2_000;

// ============================================================================
// Resilience / Retention Constants
// ============================================================================

pub const DEFAULT_BREAKER_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_BREAKER_RESET_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_RETRY_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 200;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5_000;

pub const DEFAULT_RETENTION_DAYS: i32 = 30;
pub const DEFAULT_RETENTION_INTERVAL_SECS: u64 = 3_600;

/// Default CORS allowed origin for local development.
pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "http://localhost:3000";

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub broker: BrokerConfig,
    pub resilience: ResilienceConfig,
    pub retention: RetentionConfig,
    pub cors: CorsConfig,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Broker session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub url: String,
    pub queue: String,
    pub poll_interval_ms: u64,
    pub visibility_timeout_secs: u64,
    pub max_in_flight: usize,
    pub reconnect_attempts: u32,
    pub reconnect_wait_ms: u64,
}

impl BrokerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn reconnect_wait(&self) -> Duration {
        Duration::from_millis(self.reconnect_wait_ms)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            queue: DEFAULT_BROKER_QUEUE.to_string(),
            poll_interval_ms: DEFAULT_BROKER_POLL_INTERVAL_MS,
            visibility_timeout_secs: DEFAULT_BROKER_VISIBILITY_TIMEOUT_SECS,
            max_in_flight: DEFAULT_BROKER_MAX_IN_FLIGHT,
            reconnect_attempts: DEFAULT_BROKER_RECONNECT_ATTEMPTS,
            reconnect_wait_ms: DEFAULT_BROKER_RECONNECT_WAIT_MS,
        }
    }
}

/// Circuit breaker and retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl ResilienceConfig {
    pub fn breaker(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            reset_timeout: Duration::from_secs(self.reset_timeout_secs),
        }
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Scheduled pruning of expired notices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub enabled: bool,
    pub days: i32,
    pub interval_secs: u64,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        let config = Config {
            server: ServerConfig {
                host: std::env::var("NOTAM_HOST")
                    .unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: env_or("NOTAM_PORT", DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: env_or(
                    "NOTAM_SHUTDOWN_TIMEOUT",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                ),
            },
            database: DatabaseConfig {
                url: database_url.clone(),
                max_connections: env_or(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                min_connections: env_or(
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                ),
                connect_timeout_secs: env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
                idle_timeout_secs: env_or(
                    "DATABASE_IDLE_TIMEOUT",
                    DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
                ),
            },
            broker: BrokerConfig {
                // The durable queue lives next to the notices unless pointed elsewhere
                url: std::env::var("BROKER_URL").unwrap_or(database_url),
                queue: std::env::var("BROKER_QUEUE")
                    .unwrap_or_else(|_| DEFAULT_BROKER_QUEUE.to_string()),
                poll_interval_ms: env_or("BROKER_POLL_INTERVAL_MS", DEFAULT_BROKER_POLL_INTERVAL_MS),
                visibility_timeout_secs: env_or(
                    "BROKER_VISIBILITY_TIMEOUT_SECS",
                    DEFAULT_BROKER_VISIBILITY_TIMEOUT_SECS,
                ),
                max_in_flight: env_or("BROKER_MAX_IN_FLIGHT", DEFAULT_BROKER_MAX_IN_FLIGHT),
                reconnect_attempts: env_or(
                    "BROKER_RECONNECT_ATTEMPTS",
                    DEFAULT_BROKER_RECONNECT_ATTEMPTS,
                ),
                reconnect_wait_ms: env_or(
                    "BROKER_RECONNECT_WAIT_MS",
                    DEFAULT_BROKER_RECONNECT_WAIT_MS,
                ),
            },
            resilience: ResilienceConfig {
                failure_threshold: env_or(
                    "BREAKER_FAILURE_THRESHOLD",
                    DEFAULT_BREAKER_FAILURE_THRESHOLD,
                ),
                reset_timeout_secs: env_or(
                    "BREAKER_RESET_TIMEOUT_SECS",
                    DEFAULT_BREAKER_RESET_TIMEOUT_SECS,
                ),
                max_retries: env_or("RETRY_MAX_RETRIES", DEFAULT_RETRY_MAX_RETRIES),
                base_delay_ms: env_or("RETRY_BASE_DELAY_MS", DEFAULT_RETRY_BASE_DELAY_MS),
                max_delay_ms: env_or("RETRY_MAX_DELAY_MS", DEFAULT_RETRY_MAX_DELAY_MS),
            },
            retention: RetentionConfig {
                enabled: env_or("RETENTION_ENABLED", true),
                days: env_or("RETENTION_DAYS", DEFAULT_RETENTION_DAYS),
                interval_secs: env_or("RETENTION_INTERVAL_SECS", DEFAULT_RETENTION_INTERVAL_SECS),
            },
            cors: CorsConfig {
                allowed_origins: std::env::var("CORS_ALLOWED_ORIGINS")
                    .unwrap_or_else(|_| DEFAULT_CORS_ALLOWED_ORIGIN.to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                allow_credentials: env_or("CORS_ALLOW_CREDENTIALS", true),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.broker.url.is_empty() {
            anyhow::bail!("Broker URL cannot be empty");
        }

        if self.broker.queue.is_empty() {
            anyhow::bail!("Broker queue name cannot be empty");
        }

        if self.broker.max_in_flight == 0 {
            anyhow::bail!("Broker max_in_flight must be greater than 0");
        }

        if self.resilience.failure_threshold == 0 {
            anyhow::bail!("Breaker failure_threshold must be greater than 0");
        }

        if self.resilience.base_delay_ms > self.resilience.max_delay_ms {
            anyhow::bail!(
                "Retry base delay ({}ms) cannot exceed max delay ({}ms)",
                self.resilience.base_delay_ms,
                self.resilience.max_delay_ms
            );
        }

        if self.retention.days < 0 {
            anyhow::bail!("Retention days cannot be negative");
        }

        if self.retention.enabled && self.retention.interval_secs == 0 {
            anyhow::bail!("Retention interval must be greater than 0");
        }

        if self.cors.allowed_origins.is_empty() {
            tracing::warn!("No CORS origins configured - all origins will be allowed");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            broker: BrokerConfig::default(),
            resilience: ResilienceConfig {
                failure_threshold: DEFAULT_BREAKER_FAILURE_THRESHOLD,
                reset_timeout_secs: DEFAULT_BREAKER_RESET_TIMEOUT_SECS,
                max_retries: DEFAULT_RETRY_MAX_RETRIES,
                base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
                max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            },
            retention: RetentionConfig {
                enabled: true,
                days: DEFAULT_RETENTION_DAYS,
                interval_secs: DEFAULT_RETENTION_INTERVAL_SECS,
            },
            cors: CorsConfig {
                allowed_origins: vec![DEFAULT_CORS_ALLOWED_ORIGIN.to_string()],
                allow_credentials: true,
            },
        }
    }
}
