//! External signal delivery and its in-memory implementation.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use common::InstanceId;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::SagaError;

/// What happened to a raised signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to an outstanding wait.
    Delivered,
    /// No wait was outstanding; queued for the next one.
    Buffered,
}

type Requeue = Box<dyn FnOnce(Value) + Send>;

/// A registered wait for one named signal on one instance.
///
/// Resolves with the signal payload. Dropping the subscription abandons the
/// wait: a later signal is not consumed by it, and a payload that arrived
/// but was never polled out goes back to the bus.
pub struct SignalSubscription {
    event: String,
    receiver: oneshot::Receiver<Value>,
    requeue: Option<Requeue>,
}

impl SignalSubscription {
    /// Creates a subscription that hands an unread payload to `requeue` when dropped.
    pub fn new(
        event: impl Into<String>,
        receiver: oneshot::Receiver<Value>,
        requeue: impl FnOnce(Value) + Send + 'static,
    ) -> Self {
        Self {
            event: event.into(),
            receiver,
            requeue: Some(Box::new(requeue)),
        }
    }

    /// Returns the event name this subscription waits for.
    pub fn event(&self) -> &str {
        &self.event
    }
}

impl Future for SignalSubscription {
    type Output = Result<Value, SagaError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let event = self.event.clone();
        let polled = Pin::new(&mut self.receiver).poll(cx);
        if polled.is_ready() {
            self.requeue = None;
        }
        polled.map(|result| result.map_err(|_| SagaError::SignalClosed { event }))
    }
}

impl Drop for SignalSubscription {
    fn drop(&mut self) {
        if let Some(requeue) = self.requeue.take()
            && let Ok(payload) = self.receiver.try_recv()
        {
            requeue(payload);
        }
    }
}

impl std::fmt::Debug for SignalSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalSubscription")
            .field("event", &self.event)
            .finish()
    }
}

/// Routes named signals to waiting workflow instances.
pub trait SignalBus: Send + Sync {
    /// Registers interest in the next `event` signal for `instance_id`.
    fn subscribe(&self, instance_id: &InstanceId, event: &str) -> SignalSubscription;

    /// Delivers `payload` to at most one outstanding wait, oldest first.
    fn raise(&self, instance_id: &InstanceId, event: &str, payload: Value) -> Delivery;

    /// Drops every buffered signal for an instance. Returns how many were dropped.
    fn discard(&self, instance_id: &InstanceId) -> usize;
}

type SignalKey = (InstanceId, String);

#[derive(Debug, Default)]
struct SignalState {
    waiters: HashMap<SignalKey, VecDeque<oneshot::Sender<Value>>>,
    buffered: HashMap<SignalKey, VecDeque<Value>>,
    delivered: usize,
}

/// In-memory signal bus.
#[derive(Debug, Clone, Default)]
pub struct InMemorySignalBus {
    state: Arc<Mutex<SignalState>>,
}

impl InMemorySignalBus {
    /// Creates a new signal bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of waits still open for an event.
    pub fn open_subscriptions(&self, instance_id: &InstanceId, event: &str) -> usize {
        let state = self.lock();
        state
            .waiters
            .get(&(instance_id.clone(), event.to_string()))
            .map(|waiters| waiters.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Returns the number of signals queued for an event.
    pub fn buffered_count(&self, instance_id: &InstanceId, event: &str) -> usize {
        let state = self.lock();
        state
            .buffered
            .get(&(instance_id.clone(), event.to_string()))
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Returns the total number of signals handed to a wait.
    pub fn delivered_count(&self) -> usize {
        self.lock().delivered
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SignalState> {
        lock(&self.state)
    }
}

fn lock(state: &Mutex<SignalState>) -> std::sync::MutexGuard<'_, SignalState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl SignalState {
    /// Hands `payload` to the oldest live wait, or queues it.
    fn offer(&mut self, key: SignalKey, payload: Value, front: bool) -> Delivery {
        let mut payload = payload;
        if let Some(waiters) = self.waiters.get_mut(&key) {
            while let Some(tx) = waiters.pop_front() {
                match tx.send(payload) {
                    Ok(()) => {
                        self.delivered += 1;
                        return Delivery::Delivered;
                    }
                    // Abandoned wait: take the payload back and try the next one.
                    Err(returned) => payload = returned,
                }
            }
        }

        let queue = self.buffered.entry(key).or_default();
        if front {
            queue.push_front(payload);
        } else {
            queue.push_back(payload);
        }
        Delivery::Buffered
    }
}

impl SignalBus for InMemorySignalBus {
    fn subscribe(&self, instance_id: &InstanceId, event: &str) -> SignalSubscription {
        let (tx, rx) = oneshot::channel();
        let key = (instance_id.clone(), event.to_string());
        {
            let mut state = self.lock();
            let queued = state.buffered.get_mut(&key).and_then(VecDeque::pop_front);
            match queued {
                Some(payload) => {
                    // The receiver is alive, so this cannot fail.
                    let _ = tx.send(payload);
                    state.delivered += 1;
                }
                None => state.waiters.entry(key.clone()).or_default().push_back(tx),
            }
        }

        let shared = Arc::clone(&self.state);
        SignalSubscription::new(event, rx, move |payload| {
            let mut state = lock(&shared);
            state.delivered = state.delivered.saturating_sub(1);
            tracing::debug!(instance_id = %key.0, event = %key.1, "unread signal returned to the bus");
            state.offer(key, payload, true);
        })
    }

    fn raise(&self, instance_id: &InstanceId, event: &str, payload: Value) -> Delivery {
        let key = (instance_id.clone(), event.to_string());
        let delivery = self.lock().offer(key, payload, false);
        match delivery {
            Delivery::Delivered => tracing::debug!(%instance_id, event, "signal delivered"),
            Delivery::Buffered => tracing::debug!(%instance_id, event, "no open wait, signal buffered"),
        }
        delivery
    }

    fn discard(&self, instance_id: &InstanceId) -> usize {
        let mut state = self.lock();
        state.waiters.retain(|(id, _), _| id != instance_id);
        let mut dropped = 0;
        state.buffered.retain(|(id, _), queue| {
            if id == instance_id {
                dropped += queue.len();
                false
            } else {
                true
            }
        });
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_raise_delivers_to_open_subscription() {
        let bus = InMemorySignalBus::new();
        let id = InstanceId::from_name("wait-1");

        let subscription = bus.subscribe(&id, "MyEvent");
        assert_eq!(bus.open_subscriptions(&id, "MyEvent"), 1);

        let delivery = bus.raise(&id, "MyEvent", json!(42));
        assert_eq!(delivery, Delivery::Delivered);
        assert_eq!(subscription.await.unwrap(), json!(42));
        assert_eq!(bus.delivered_count(), 1);
    }

    #[tokio::test]
    async fn test_signal_before_subscription_is_buffered() {
        let bus = InMemorySignalBus::new();
        let id = InstanceId::from_name("wait-1");

        assert_eq!(bus.raise(&id, "MyEvent", json!(7)), Delivery::Buffered);
        assert_eq!(bus.buffered_count(&id, "MyEvent"), 1);

        let payload = bus.subscribe(&id, "MyEvent").await.unwrap();
        assert_eq!(payload, json!(7));
        assert_eq!(bus.buffered_count(&id, "MyEvent"), 0);
    }

    #[tokio::test]
    async fn test_abandoned_subscription_does_not_consume() {
        let bus = InMemorySignalBus::new();
        let id = InstanceId::from_name("wait-1");

        drop(bus.subscribe(&id, "MyEvent"));
        assert_eq!(bus.open_subscriptions(&id, "MyEvent"), 0);

        assert_eq!(bus.raise(&id, "MyEvent", json!(1)), Delivery::Buffered);
        assert_eq!(bus.delivered_count(), 0);
    }

    #[tokio::test]
    async fn test_unread_payload_returns_to_bus_on_drop() {
        let bus = InMemorySignalBus::new();
        let id = InstanceId::from_name("wait-1");

        let lost = bus.subscribe(&id, "MyEvent");
        assert_eq!(bus.raise(&id, "MyEvent", json!(9)), Delivery::Delivered);
        drop(lost);

        assert_eq!(bus.buffered_count(&id, "MyEvent"), 1);
        assert_eq!(bus.delivered_count(), 0);
        assert_eq!(bus.subscribe(&id, "MyEvent").await.unwrap(), json!(9));
        assert_eq!(bus.delivered_count(), 1);
    }

    #[tokio::test]
    async fn test_one_signal_wakes_one_wait() {
        let bus = InMemorySignalBus::new();
        let id = InstanceId::from_name("wait-1");

        let first = bus.subscribe(&id, "MyEvent");
        let second = bus.subscribe(&id, "MyEvent");

        bus.raise(&id, "MyEvent", json!("a"));
        assert_eq!(first.await.unwrap(), json!("a"));
        assert_eq!(bus.open_subscriptions(&id, "MyEvent"), 1);

        bus.raise(&id, "MyEvent", json!("b"));
        assert_eq!(second.await.unwrap(), json!("b"));
    }

    #[tokio::test]
    async fn test_signals_are_scoped_by_instance_and_name() {
        let bus = InMemorySignalBus::new();
        let a = InstanceId::from_name("a");
        let b = InstanceId::from_name("b");

        let _wait = bus.subscribe(&a, "payEvent");
        assert_eq!(bus.raise(&b, "payEvent", json!(true)), Delivery::Buffered);
        assert_eq!(bus.raise(&a, "otherEvent", json!(true)), Delivery::Buffered);
        assert_eq!(bus.open_subscriptions(&a, "payEvent"), 1);
    }

    #[tokio::test]
    async fn test_discard_drops_buffered_signals() {
        let bus = InMemorySignalBus::new();
        let id = InstanceId::from_name("done");

        bus.raise(&id, "late", json!(1));
        bus.raise(&id, "late", json!(2));
        assert_eq!(bus.discard(&id), 2);
        assert_eq!(bus.buffered_count(&id, "late"), 0);
    }
}
