//! Postgres-backed durable queue
//!
//! Messages live in `inbound_messages`. Consumers claim rows with
//! `FOR UPDATE SKIP LOCKED`, so several sessions can share a queue. A claimed
//! row that is not acknowledged within the visibility timeout becomes
//! claimable again, which is how redelivery happens.

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{BrokerError, BrokerEvent, BrokerSession, Delivery, EVENT_CHANNEL_CAPACITY};
use crate::config::BrokerConfig;
use crate::resilience::is_connection_error;

/// Publish a message; returns its id
pub async fn enqueue(pool: &PgPool, queue: &str, payload: &[u8]) -> Result<i64, BrokerError> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO inbound_messages (queue_name, payload)
        VALUES ($1, $2)
        RETURNING id
        "#,
    )
    .bind(queue)
    .bind(payload)
    .fetch_one(pool)
    .await?;

    debug!(queue, id, bytes = payload.len(), "Enqueued message");
    Ok(id)
}

struct Consumer {
    queue: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Deliveries handed out by this session and not yet acknowledged
type InFlight = Arc<Mutex<HashMap<i64, Instant>>>;

pub struct PgQueueSession {
    config: BrokerConfig,
    pool: Mutex<Option<PgPool>>,
    owns_pool: bool,
    events: Mutex<Option<mpsc::Sender<BrokerEvent>>>,
    consumer: Mutex<Option<Consumer>>,
    in_flight: InFlight,
}

impl PgQueueSession {
    /// Session that opens (and later closes) its own pool to `config.url`
    pub fn new(config: BrokerConfig) -> Self {
        Self::build(config, None)
    }

    /// Session over an existing pool; `disconnect` leaves the pool open
    pub fn from_pool(pool: PgPool, config: BrokerConfig) -> Self {
        Self::build(config, Some(pool))
    }

    fn build(config: BrokerConfig, pool: Option<PgPool>) -> Self {
        Self {
            config,
            owns_pool: pool.is_none(),
            pool: Mutex::new(pool),
            events: Mutex::new(None),
            consumer: Mutex::new(None),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn pool(&self) -> Result<PgPool, BrokerError> {
        self.pool.lock().clone().ok_or(BrokerError::Closed)
    }

    /// Number of deliveries awaiting acknowledgement from this session
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    async fn establish(&self) -> Result<PgPool, BrokerError> {
        let existing = self.pool.lock().clone();
        let attempts = self.config.reconnect_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let result = match &existing {
                Some(pool) => sqlx::query("SELECT 1").execute(pool).await.map(|_| pool.clone()),
                None => {
                    PgPoolOptions::new()
                        .max_connections(2)
                        .acquire_timeout(Duration::from_secs(10))
                        .connect(&self.config.url)
                        .await
                },
            };

            match result {
                Ok(pool) => return Ok(pool),
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "Queue connection attempt failed");
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(self.config.reconnect_wait()).await;
                    }
                },
            }
        }

        Err(BrokerError::Connection(last_error))
    }
}

#[async_trait]
impl BrokerSession for PgQueueSession {
    async fn connect(&self) -> Result<mpsc::Receiver<BrokerEvent>, BrokerError> {
        let pool = self.establish().await?;
        *self.pool.lock() = Some(pool);

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tx.try_send(BrokerEvent::Connected)
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        *self.events.lock() = Some(tx);

        info!("Queue session connected");
        Ok(rx)
    }

    async fn subscribe(&self, queue: &str) -> Result<(), BrokerError> {
        let pool = self.pool()?;
        let tx = self.events.lock().clone().ok_or(BrokerError::Closed)?;

        let mut consumer = self.consumer.lock();
        if let Some(existing) = consumer.as_ref() {
            return Err(BrokerError::Subscription {
                queue: queue.to_string(),
                reason: format!("already subscribed to '{}'", existing.queue),
            });
        }

        let cancel = CancellationToken::new();
        let ctx = ConsumerContext {
            pool,
            queue: queue.to_string(),
            config: self.config.clone(),
            tx,
            in_flight: Arc::clone(&self.in_flight),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(ctx.run());

        *consumer = Some(Consumer {
            queue: queue.to_string(),
            cancel,
            handle,
        });

        info!(queue, "Subscribed to queue");
        Ok(())
    }

    async fn acknowledge(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        let pool = self.pool()?;

        sqlx::query("UPDATE inbound_messages SET acked_at = NOW() WHERE id = $1 AND acked_at IS NULL")
            .bind(delivery.delivery_id)
            .execute(&pool)
            .await
            .map_err(|e| BrokerError::Acknowledge {
                delivery_id: delivery.delivery_id,
                reason: e.to_string(),
            })?;

        self.in_flight.lock().remove(&delivery.delivery_id);
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<(), BrokerError> {
        let consumer = self.consumer.lock().take();
        if let Some(consumer) = consumer {
            consumer.cancel.cancel();
            if let Err(e) = consumer.handle.await {
                warn!(queue = %consumer.queue, error = %e, "Queue consumer task failed");
            }
            info!(queue = %consumer.queue, "Unsubscribed from queue");
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.unsubscribe().await?;
        self.events.lock().take();
        self.in_flight.lock().clear();

        let pool = self.pool.lock().take();
        if let Some(pool) = pool {
            if self.owns_pool {
                pool.close().await;
            }
        }

        info!("Queue session disconnected");
        Ok(())
    }
}

struct ConsumerContext {
    pool: PgPool,
    queue: String,
    config: BrokerConfig,
    tx: mpsc::Sender<BrokerEvent>,
    in_flight: InFlight,
    cancel: CancellationToken,
}

impl ConsumerContext {
    async fn run(self) {
        while !self.cancel.is_cancelled() {
            let capacity = self.capacity();
            if capacity == 0 {
                if !self.idle(self.config.poll_interval()).await {
                    break;
                }
                continue;
            }

            match self.claim(capacity).await {
                Ok(deliveries) if deliveries.is_empty() => {
                    if !self.idle(self.config.poll_interval()).await {
                        break;
                    }
                },
                Ok(deliveries) => {
                    for delivery in deliveries {
                        self.in_flight.lock().insert(delivery.delivery_id, Instant::now());
                        if !self.send(BrokerEvent::Message(delivery)).await {
                            return;
                        }
                    }
                },
                Err(e) if is_connection_error(&e) => {
                    if !self.reconnect(e).await {
                        return;
                    }
                },
                Err(e) => {
                    warn!(queue = %self.queue, error = %e, "Queue poll failed");
                    let event = BrokerEvent::SubscriptionError(BrokerError::Subscription {
                        queue: self.queue.clone(),
                        reason: e.to_string(),
                    });
                    if !self.send(event).await || !self.idle(self.config.poll_interval()).await {
                        return;
                    }
                },
            }
        }
        debug!(queue = %self.queue, "Queue consumer stopped");
    }

    /// Free slots in the in-flight window; entries past the visibility
    /// timeout no longer count since the queue will redeliver them
    fn capacity(&self) -> usize {
        let visibility = self.config.visibility_timeout();
        let mut in_flight = self.in_flight.lock();
        in_flight.retain(|_, claimed| claimed.elapsed() < visibility);
        self.config.max_in_flight.saturating_sub(in_flight.len())
    }

    async fn claim(&self, limit: usize) -> Result<Vec<Delivery>, sqlx::Error> {
        let rows = sqlx::query_as::<_, (i64, Vec<u8>, i32)>(
            r#"
            UPDATE inbound_messages
            SET claimed_at = NOW(), delivery_count = delivery_count + 1
            WHERE id IN (
                SELECT id FROM inbound_messages
                WHERE queue_name = $1
                  AND acked_at IS NULL
                  AND (claimed_at IS NULL OR claimed_at < NOW() - make_interval(secs => $2))
                ORDER BY id
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, payload, delivery_count
            "#,
        )
        .bind(&self.queue)
        .bind(self.config.visibility_timeout().as_secs_f64())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let mut deliveries: Vec<Delivery> = rows
            .into_iter()
            .map(|(id, payload, count)| Delivery {
                delivery_id: id,
                payload,
                delivery_count: u32::try_from(count).unwrap_or(0),
            })
            .collect();
        deliveries.sort_by_key(|d| d.delivery_id);
        Ok(deliveries)
    }

    async fn reconnect(&self, error: sqlx::Error) -> bool {
        warn!(queue = %self.queue, error = %error, "Queue connection lost");

        for attempt in 1..=self.config.reconnect_attempts {
            if !self.send(BrokerEvent::Reconnecting { attempt }).await
                || !self.idle(self.config.reconnect_wait()).await
            {
                return false;
            }
            if sqlx::query("SELECT 1").execute(&self.pool).await.is_ok() {
                info!(queue = %self.queue, attempt, "Queue connection restored");
                return self.send(BrokerEvent::Reconnected).await;
            }
        }

        self.send(BrokerEvent::Disconnected {
            reason: error.to_string(),
        })
        .await;
        false
    }

    /// Sleep unless cancelled; false when cancelled
    async fn idle(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Deliver an event unless cancelled or the receiver is gone
    async fn send(&self, event: BrokerEvent) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        }
    }
}
