//! Broker-driven ingestion loop
//!
//! State machine over one broker session:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Subscribed <-> Processing
//!       ^______________ broker-initiated disconnect ______________|
//! ```
//!
//! Reconnection belongs to the session; the coordinator only tracks it.
//! Each delivery is acknowledged when it was stored or is unparseable, and
//! left unacknowledged otherwise so the broker redelivers it.

use futures::FutureExt;
use notam_ingest::NoticeParser;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{IngestFault, IngestStats};
use crate::broker::{BrokerError, BrokerEvent, BrokerSession, Delivery};
use crate::db::NoticeStore;
use crate::resilience::{GuardError, ResilienceGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinatorState {
    Disconnected,
    Connecting,
    Connected,
    Subscribed,
    Processing,
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoordinatorState::Disconnected => "disconnected",
            CoordinatorState::Connecting => "connecting",
            CoordinatorState::Connected => "connected",
            CoordinatorState::Subscribed => "subscribed",
            CoordinatorState::Processing => "processing",
        };
        f.write_str(name)
    }
}

/// What happened to one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Stored { inserted: bool },
    Unparseable { category: &'static str },
    /// Breaker denied admission; nothing was attempted
    Deferred,
    Failed,
    Panicked,
}

impl MessageOutcome {
    pub fn acknowledges(&self) -> bool {
        matches!(self, MessageOutcome::Stored { .. } | MessageOutcome::Unparseable { .. })
    }
}

enum Flow {
    Continue,
    Stop(Result<(), BrokerError>),
}

pub struct IngestionCoordinator {
    session: Arc<dyn BrokerSession>,
    store: Arc<dyn NoticeStore>,
    guard: Arc<ResilienceGuard>,
    parser: NoticeParser,
    queue: String,
    stats: Arc<IngestStats>,
    state: watch::Sender<CoordinatorState>,
    faults: Option<mpsc::Sender<IngestFault>>,
}

impl IngestionCoordinator {
    pub fn new(
        session: Arc<dyn BrokerSession>,
        store: Arc<dyn NoticeStore>,
        guard: Arc<ResilienceGuard>,
        queue: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(CoordinatorState::Disconnected);
        Self {
            session,
            store,
            guard,
            parser: NoticeParser::new(),
            queue: queue.into(),
            stats: Arc::new(IngestStats::new()),
            state,
            faults: None,
        }
    }

    /// Report operator-facing failures on `faults`
    pub fn with_fault_channel(mut self, faults: mpsc::Sender<IngestFault>) -> Self {
        self.faults = Some(faults);
        self
    }

    /// Count into shared `stats` instead of a private set
    pub fn with_stats(mut self, stats: Arc<IngestStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> &Arc<IngestStats> {
        &self.stats
    }

    pub fn state(&self) -> CoordinatorState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<CoordinatorState> {
        self.state.subscribe()
    }

    /// Consume the session until `shutdown` fires or the broker gives up.
    ///
    /// A message being handled when `shutdown` fires is finished first.
    /// The session is unsubscribed and disconnected before returning.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), BrokerError> {
        self.transition(CoordinatorState::Connecting);

        let mut events = match self.session.connect().await {
            Ok(events) => events,
            Err(e) => {
                error!(error = %e, "Failed to connect to broker");
                self.report(IngestFault::Broker(e.to_string()));
                self.transition(CoordinatorState::Disconnected);
                return Err(e);
            },
        };

        let result = loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping ingestion");
                    break Ok(());
                }
                event = events.recv() => event,
            };

            let Some(event) = event else {
                warn!("Broker event channel closed");
                self.report(IngestFault::Broker("event channel closed".to_string()));
                break Err(BrokerError::Closed);
            };

            if let Flow::Stop(result) = self.on_event(event).await {
                break result;
            }
        };

        self.release().await;
        result
    }

    async fn on_event(&self, event: BrokerEvent) -> Flow {
        debug!(event = event.kind(), state = %self.state(), "Broker event");

        match event {
            BrokerEvent::Connected => {
                self.transition(CoordinatorState::Connected);
                if let Err(e) = self.session.subscribe(&self.queue).await {
                    error!(queue = %self.queue, error = %e, "Subscription failed");
                    self.report(IngestFault::Broker(e.to_string()));
                    return Flow::Stop(Err(e));
                }
                self.transition(CoordinatorState::Subscribed);
                info!(queue = %self.queue, "Ingestion subscribed");
            },
            BrokerEvent::Reconnecting { attempt } => {
                warn!(attempt, "Broker reconnecting");
                self.transition(CoordinatorState::Connecting);
            },
            BrokerEvent::Reconnected => {
                info!("Broker reconnected");
                self.transition(CoordinatorState::Subscribed);
            },
            BrokerEvent::Disconnected { reason } => {
                error!(reason = %reason, "Broker disconnected");
                self.report(IngestFault::Broker(reason.clone()));
                self.transition(CoordinatorState::Disconnected);
                return Flow::Stop(Err(BrokerError::Connection(reason)));
            },
            BrokerEvent::SubscriptionError(e) => {
                error!(queue = %self.queue, error = %e, "Subscription error");
                self.report(IngestFault::Broker(e.to_string()));
            },
            BrokerEvent::Message(delivery) => {
                self.transition(CoordinatorState::Processing);
                self.handle_delivery(&delivery).await;
                self.transition(CoordinatorState::Subscribed);
            },
        }

        Flow::Continue
    }

    /// Process one delivery and acknowledge it when the outcome allows.
    ///
    /// Never panics: a panic inside processing is caught and recorded as a
    /// qualifying breaker failure.
    pub async fn handle_delivery(&self, delivery: &Delivery) -> MessageOutcome {
        self.stats.record_received();

        let outcome = match AssertUnwindSafe(self.process(delivery)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(&*panic);
                error!(
                    delivery_id = delivery.delivery_id,
                    panic = %message,
                    "Message handler panicked"
                );
                self.guard.breaker().record_qualifying_failure();
                self.stats.record_panic();
                self.report(IngestFault::Panic {
                    delivery_id: delivery.delivery_id,
                    message,
                });
                MessageOutcome::Panicked
            },
        };

        if outcome.acknowledges() {
            if let Err(e) = self.session.acknowledge(delivery).await {
                warn!(delivery_id = delivery.delivery_id, error = %e, "Acknowledgement failed");
                self.report(IngestFault::Broker(e.to_string()));
            }
        }

        outcome
    }

    async fn process(&self, delivery: &Delivery) -> MessageOutcome {
        if !self.guard.is_request_allowed() {
            debug!(delivery_id = delivery.delivery_id, "Circuit open, leaving message for redelivery");
            self.stats.record_deferred();
            return MessageOutcome::Deferred;
        }

        let notice = match self.parser.try_parse(&delivery.payload) {
            Ok(notice) => notice,
            Err(failure) => {
                warn!(
                    delivery_id = delivery.delivery_id,
                    category = failure.category(),
                    error = %failure,
                    "Dropping unparseable message"
                );
                self.stats.record_unparseable();
                return MessageOutcome::Unparseable {
                    category: failure.category(),
                };
            },
        };

        match self.guard.execute(|| self.store.upsert(&notice)).await {
            Ok(outcome) => {
                info!(
                    identifier = %notice.identifier,
                    location = %notice.location,
                    inserted = outcome.inserted,
                    delivery_count = delivery.delivery_count,
                    "Stored notice"
                );
                self.stats.record_stored(outcome.inserted);
                MessageOutcome::Stored {
                    inserted: outcome.inserted,
                }
            },
            Err(GuardError::CircuitOpen) => {
                debug!(delivery_id = delivery.delivery_id, "Circuit opened before store call");
                self.stats.record_deferred();
                MessageOutcome::Deferred
            },
            Err(GuardError::Operation(e)) => {
                error!(
                    identifier = %notice.identifier,
                    delivery_id = delivery.delivery_id,
                    error = %e,
                    "Failed to store notice, leaving message for redelivery"
                );
                self.stats.record_failed();
                self.report(IngestFault::Storage {
                    delivery_id: delivery.delivery_id,
                    identifier: notice.identifier.clone(),
                    message: e.to_string(),
                });
                MessageOutcome::Failed
            },
        }
    }

    async fn release(&self) {
        if let Err(e) = self.session.unsubscribe().await {
            warn!(error = %e, "Unsubscribe failed");
        }
        if let Err(e) = self.session.disconnect().await {
            warn!(error = %e, "Disconnect failed");
        }
        self.transition(CoordinatorState::Disconnected);
        info!("Broker session released");
    }

    fn transition(&self, next: CoordinatorState) {
        self.state.send_replace(next);
    }

    fn report(&self, fault: IngestFault) {
        if let Some(faults) = &self.faults {
            if let Err(e) = faults.try_send(fault) {
                warn!(error = %e, "Fault channel unavailable, fault dropped");
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::db::{DbResult, NoticeFilters, StoredNotice, UpsertOutcome};
    use crate::resilience::{BreakerConfig, RetryConfig};
    use async_trait::async_trait;
    use notam_common::Notice;
    use std::time::Duration;

    /// Store that must never be reached
    struct Unreachable;

    #[async_trait]
    impl NoticeStore for Unreachable {
        async fn upsert(&self, _: &Notice) -> DbResult<UpsertOutcome> {
            panic!("store reached")
        }
        async fn get(&self, _: &str) -> DbResult<Option<StoredNotice>> {
            Ok(None)
        }
        async fn query(&self, _: &NoticeFilters) -> DbResult<Vec<StoredNotice>> {
            Ok(Vec::new())
        }
        async fn count(&self, _: &NoticeFilters) -> DbResult<i64> {
            Ok(0)
        }
        async fn delete_expired(&self, _: i32) -> DbResult<u64> {
            Ok(0)
        }
    }

    fn coordinator(broker: &InMemoryBroker) -> IngestionCoordinator {
        let guard = ResilienceGuard::new(
            BreakerConfig {
                failure_threshold: 1,
                reset_timeout: Duration::from_secs(60),
            },
            RetryConfig::default(),
        );
        IngestionCoordinator::new(
            Arc::new(broker.clone()),
            Arc::new(Unreachable),
            Arc::new(guard),
            "notam.inbound",
        )
    }

    #[test]
    fn test_acknowledging_outcomes() {
        assert!(MessageOutcome::Stored { inserted: false }.acknowledges());
        assert!(MessageOutcome::Unparseable { category: "missing-root-element" }.acknowledges());
        assert!(!MessageOutcome::Deferred.acknowledges());
        assert!(!MessageOutcome::Failed.acknowledges());
        assert!(!MessageOutcome::Panicked.acknowledges());
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*boxed), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*boxed), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(&*boxed), "non-string panic payload");
    }

    #[tokio::test]
    async fn test_unparseable_is_acknowledged_without_store() {
        let broker = InMemoryBroker::new();
        let coordinator = coordinator(&broker);
        let _events = broker.connect().await.unwrap();
        broker.subscribe("notam.inbound").await.unwrap();

        let id = broker.publish("<Message><hasMember>");
        let delivery = Delivery {
            delivery_id: id,
            payload: b"<Message><hasMember>".to_vec(),
            delivery_count: 1,
        };

        let outcome = coordinator.handle_delivery(&delivery).await;
        assert_eq!(
            outcome,
            MessageOutcome::Unparseable {
                category: "missing-root-element"
            }
        );
        assert_eq!(broker.acked_ids(), vec![id]);
        assert_eq!(coordinator.stats().snapshot().unparseable, 1);
    }

    #[tokio::test]
    async fn test_open_breaker_defers_without_parsing() {
        let broker = InMemoryBroker::new();
        let coordinator = coordinator(&broker);
        coordinator.guard.breaker().record_qualifying_failure();

        let delivery = Delivery {
            delivery_id: 1,
            payload: b"not even a notice".to_vec(),
            delivery_count: 1,
        };
        assert_eq!(coordinator.handle_delivery(&delivery).await, MessageOutcome::Deferred);
        assert!(broker.acked_ids().is_empty());

        let snapshot = coordinator.stats().snapshot();
        assert_eq!(snapshot.deferred, 1);
        assert_eq!(snapshot.unparseable, 0);
    }

    #[tokio::test]
    async fn test_lifecycle_events_drive_state() {
        let broker = InMemoryBroker::new();
        let coordinator = Arc::new(coordinator(&broker));
        let mut states = coordinator.watch_state();
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            let shutdown = shutdown.clone();
            async move { coordinator.run(shutdown).await }
        });

        states.wait_for(|s| *s == CoordinatorState::Subscribed).await.unwrap();
        assert_eq!(broker.subscription().as_deref(), Some("notam.inbound"));

        assert!(broker.emit(BrokerEvent::Reconnecting { attempt: 1 }));
        states.wait_for(|s| *s == CoordinatorState::Connecting).await.unwrap();
        assert!(broker.emit(BrokerEvent::Reconnected));
        states.wait_for(|s| *s == CoordinatorState::Subscribed).await.unwrap();

        shutdown.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(coordinator.state(), CoordinatorState::Disconnected);
        assert_eq!(broker.subscription(), None);
    }

    #[tokio::test]
    async fn test_broker_disconnect_stops_run() {
        let broker = InMemoryBroker::new();
        let (tx, mut faults) = mpsc::channel(8);
        let coordinator = Arc::new(coordinator(&broker).with_fault_channel(tx));
        let mut states = coordinator.watch_state();

        let handle = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.run(CancellationToken::new()).await }
        });
        states.wait_for(|s| *s == CoordinatorState::Subscribed).await.unwrap();

        broker.emit(BrokerEvent::Disconnected {
            reason: "reconnect attempts exhausted".to_string(),
        });

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, BrokerError::Connection(ref r) if r == "reconnect attempts exhausted"));
        assert_eq!(
            faults.recv().await,
            Some(IngestFault::Broker("reconnect attempts exhausted".to_string()))
        );
        assert_eq!(coordinator.state(), CoordinatorState::Disconnected);
    }
}
