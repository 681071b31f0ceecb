//! In-process broker for tests and local runs
//!
//! A single session over a single queue. Unacknowledged deliveries stay
//! parked until [`InMemoryBroker::redeliver_unacked`] is called, which stands
//! in for a broker's redelivery timer.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{BrokerError, BrokerEvent, BrokerSession, Delivery, EVENT_CHANNEL_CAPACITY};

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    pending: VecDeque<Delivery>,
    unacked: BTreeMap<i64, Delivery>,
    acked: Vec<i64>,
    subscription: Option<String>,
    events: Option<mpsc::Sender<BrokerEvent>>,
    connect_calls: u32,
}

impl MemoryState {
    fn dispatch(&mut self) {
        if self.subscription.is_none() {
            return;
        }
        let Some(tx) = self.events.clone() else {
            return;
        };

        while let Some(mut delivery) = self.pending.pop_front() {
            delivery.delivery_count += 1;
            match tx.try_send(BrokerEvent::Message(delivery.clone())) {
                Ok(()) => {
                    self.unacked.insert(delivery.delivery_id, delivery);
                },
                Err(_) => {
                    delivery.delivery_count -= 1;
                    self.pending.push_front(delivery);
                    break;
                },
            }
        }
    }
}

/// Cloning shares the same broker
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message; delivered at once when subscribed
    pub fn publish(&self, payload: impl Into<Vec<u8>>) -> i64 {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.pending.push_back(Delivery {
            delivery_id: id,
            payload: payload.into(),
            delivery_count: 0,
        });
        state.dispatch();
        id
    }

    /// Put every unacknowledged delivery back on the queue; returns how many
    pub fn redeliver_unacked(&self) -> usize {
        let mut state = self.state.lock();
        let unacked = std::mem::take(&mut state.unacked);
        let count = unacked.len();
        for (_, delivery) in unacked.into_iter().rev() {
            state.pending.push_front(delivery);
        }
        state.dispatch();
        count
    }

    /// Inject a lifecycle event into the open session
    pub fn emit(&self, event: BrokerEvent) -> bool {
        let state = self.state.lock();
        match &state.events {
            Some(tx) => tx.try_send(event).is_ok(),
            None => false,
        }
    }

    /// Drop the sending side, as a broker vanishing would
    pub fn close_channel(&self) {
        self.state.lock().events = None;
    }

    pub fn acked_ids(&self) -> Vec<i64> {
        self.state.lock().acked.clone()
    }

    pub fn unacked_count(&self) -> usize {
        self.state.lock().unacked.len()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn subscription(&self) -> Option<String> {
        self.state.lock().subscription.clone()
    }

    pub fn connect_calls(&self) -> u32 {
        self.state.lock().connect_calls
    }
}

#[async_trait]
impl BrokerSession for InMemoryBroker {
    async fn connect(&self) -> Result<mpsc::Receiver<BrokerEvent>, BrokerError> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tx.try_send(BrokerEvent::Connected)
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        let mut state = self.state.lock();
        state.connect_calls += 1;
        state.events = Some(tx);
        Ok(rx)
    }

    async fn subscribe(&self, queue: &str) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        if state.events.is_none() {
            return Err(BrokerError::Closed);
        }
        state.subscription = Some(queue.to_string());
        state.dispatch();
        Ok(())
    }

    async fn acknowledge(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        if state.unacked.remove(&delivery.delivery_id).is_some() {
            state.acked.push(delivery.delivery_id);
        }
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<(), BrokerError> {
        self.state.lock().subscription = None;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        state.subscription = None;
        state.events = None;
        Ok(())
    }
}
