//! Durable queue sessions
//!
//! A session delivers messages at least once. Lifecycle changes and messages
//! arrive as [`BrokerEvent`]s on the channel returned by
//! [`BrokerSession::connect`]; a delivery that is never acknowledged is
//! redelivered by the session itself, there is no negative acknowledgement.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod memory;
pub mod pg_queue;

pub use memory::InMemoryBroker;
pub use pg_queue::{enqueue, PgQueueSession};

/// Capacity of the event channel handed to the consumer of a session
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Broker connection failed: {0}")]
    Connection(String),

    #[error("Subscription to '{queue}' failed: {reason}")]
    Subscription { queue: String, reason: String },

    #[error("Acknowledgement of delivery {delivery_id} failed: {reason}")]
    Acknowledge { delivery_id: i64, reason: String },

    #[error("Broker session is closed")]
    Closed,

    #[error("Queue storage error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// One delivery of one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_id: i64,
    pub payload: Vec<u8>,
    /// 1 on first delivery, incremented on every redelivery
    pub delivery_count: u32,
}

#[derive(Debug)]
pub enum BrokerEvent {
    Connected,
    /// The session lost its connection and is retrying
    Reconnecting { attempt: u32 },
    /// Connection restored; existing subscriptions are kept
    Reconnected,
    /// The session gave up; no further events follow
    Disconnected { reason: String },
    SubscriptionError(BrokerError),
    Message(Delivery),
}

impl BrokerEvent {
    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerEvent::Connected => "connected",
            BrokerEvent::Reconnecting { .. } => "reconnecting",
            BrokerEvent::Reconnected => "reconnected",
            BrokerEvent::Disconnected { .. } => "disconnected",
            BrokerEvent::SubscriptionError(_) => "subscription-error",
            BrokerEvent::Message(_) => "message",
        }
    }
}

#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Open the session. Emits [`BrokerEvent::Connected`] first.
    async fn connect(&self) -> Result<mpsc::Receiver<BrokerEvent>, BrokerError>;

    /// Start receiving messages from `queue`
    async fn subscribe(&self, queue: &str) -> Result<(), BrokerError>;

    async fn acknowledge(&self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Stop delivering messages; unacknowledged deliveries stay redeliverable
    async fn unsubscribe(&self) -> Result<(), BrokerError>;

    /// Tear down the session; the event channel closes afterwards
    async fn disconnect(&self) -> Result<(), BrokerError>;
}
