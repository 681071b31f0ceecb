//! Queue-driven notice ingestion
//!
//! The [`IngestionCoordinator`] consumes a broker session and routes each
//! delivery through the parser and the guarded store. The
//! [`RetentionTask`] prunes expired notices out of band.

use thiserror::Error;

pub mod coordinator;
pub mod retention;
pub mod stats;

pub use coordinator::{CoordinatorState, IngestionCoordinator, MessageOutcome};
pub use retention::RetentionTask;
pub use stats::{IngestStats, StatsSnapshot};

/// Capacity of the operator fault channel
pub const FAULT_CHANNEL_CAPACITY: usize = 256;

/// Failure worth an operator's attention, sent on the fault channel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestFault {
    #[error("Failed to store notice {identifier} from delivery {delivery_id}: {message}")]
    Storage {
        delivery_id: i64,
        identifier: String,
        message: String,
    },

    #[error("Broker connectivity: {0}")]
    Broker(String),

    #[error("Handler panicked on delivery {delivery_id}: {message}")]
    Panic { delivery_id: i64, message: String },
}
