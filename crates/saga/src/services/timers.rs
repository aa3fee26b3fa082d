//! Durable timers and their in-memory implementation.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use common::InstanceId;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::clock::{Clock, SystemClock};

type Canceler = Box<dyn FnOnce() -> bool + Send>;

/// A handle to a registered deadline.
///
/// Awaiting the handle resolves once the timer fires. A timer that is
/// neither awaited to completion nor canceled stays pending in its
/// service, which the host treats as a leak when the owning instance exits.
pub struct DurableTimer {
    id: u64,
    fire_at: DateTime<Utc>,
    fired: oneshot::Receiver<()>,
    canceler: Option<Canceler>,
}

impl DurableTimer {
    /// Returns the timer ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the absolute deadline.
    pub fn fire_at(&self) -> DateTime<Utc> {
        self.fire_at
    }

    /// Cancels the timer. Returns true if it was still pending.
    ///
    /// After this returns the timer never delivers.
    pub fn cancel(mut self) -> bool {
        self.canceler.take().is_some_and(|cancel| cancel())
    }
}

impl std::fmt::Debug for DurableTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableTimer")
            .field("id", &self.id)
            .field("fire_at", &self.fire_at)
            .finish()
    }
}

impl Future for DurableTimer {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match Pin::new(&mut self.fired).poll(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(()),
            // Sender dropped without firing: the timer was canceled and must not deliver.
            Poll::Ready(Err(_)) | Poll::Pending => Poll::Pending,
        }
    }
}

/// Creates and tracks durable timers.
pub trait TimerService: Send + Sync {
    /// Registers a timer for `instance_id` that fires at or after `fire_at`.
    ///
    /// Must be called from within a tokio runtime.
    fn create_timer(&self, instance_id: &InstanceId, fire_at: DateTime<Utc>) -> DurableTimer;

    /// Returns the IDs of timers owned by `instance_id` that are still pending.
    fn pending_for(&self, instance_id: &InstanceId) -> Vec<u64>;

    /// Cancels every pending timer owned by `instance_id`. Returns how many were canceled.
    fn cancel_all(&self, instance_id: &InstanceId) -> usize;
}

struct TimerEntry {
    instance_id: InstanceId,
    task: Option<JoinHandle<()>>,
}

/// Holds pending timers only. Resolved timers leave the table and are
/// remembered by the counters alone.
#[derive(Default)]
struct TimerTable {
    next_id: u64,
    pending: HashMap<u64, TimerEntry>,
    fired: usize,
    canceled: usize,
}

impl TimerTable {
    fn cancel(&mut self, id: u64) -> bool {
        let Some(entry) = self.pending.remove(&id) else {
            return false;
        };
        if let Some(task) = entry.task {
            task.abort();
        }
        self.canceled += 1;
        true
    }

    fn owned_by(&self, instance_id: &InstanceId) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, t)| &t.instance_id == instance_id)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// In-memory timer service backed by tokio timers.
///
/// Each timer is a spawned task that sleeps until the deadline and marks
/// itself fired unless it was canceled first.
#[derive(Clone)]
pub struct InMemoryTimerService {
    table: Arc<Mutex<TimerTable>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryTimerService {
    /// Creates a timer service measuring deadlines against the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a timer service measuring deadlines against `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            table: Arc::new(Mutex::new(TimerTable::default())),
            clock,
        }
    }

    /// Returns true while the timer has neither fired nor been canceled.
    pub fn is_pending(&self, timer_id: u64) -> bool {
        lock(&self.table).pending.contains_key(&timer_id)
    }

    /// Returns the number of timers that fired.
    pub fn fired_count(&self) -> usize {
        lock(&self.table).fired
    }

    /// Returns the number of timers canceled before firing.
    pub fn canceled_count(&self) -> usize {
        lock(&self.table).canceled
    }

    /// Returns the number of timers still pending across all instances.
    pub fn pending_count(&self) -> usize {
        lock(&self.table).pending.len()
    }
}

impl Default for InMemoryTimerService {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(table: &Mutex<TimerTable>) -> std::sync::MutexGuard<'_, TimerTable> {
    table.lock().unwrap_or_else(|e| e.into_inner())
}

impl TimerService for InMemoryTimerService {
    fn create_timer(&self, instance_id: &InstanceId, fire_at: DateTime<Utc>) -> DurableTimer {
        let delay = (fire_at - self.clock.now()).to_std().unwrap_or_default();
        let (tx, rx) = oneshot::channel();

        // Register before spawning so a zero-delay timer always finds its entry.
        let id = {
            let mut table = lock(&self.table);
            table.next_id += 1;
            let id = table.next_id;
            table.pending.insert(
                id,
                TimerEntry {
                    instance_id: instance_id.clone(),
                    task: None,
                },
            );
            id
        };

        let table = Arc::clone(&self.table);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut table = lock(&table);
                if table.pending.remove(&id).is_none() {
                    return;
                }
                table.fired += 1;
            }
            tracing::debug!(timer_id = id, "durable timer fired");
            let _ = tx.send(());
        });

        if let Some(entry) = lock(&self.table).pending.get_mut(&id) {
            entry.task = Some(task);
        }

        let table = Arc::clone(&self.table);
        DurableTimer {
            id,
            fire_at,
            fired: rx,
            canceler: Some(Box::new(move || lock(&table).cancel(id))),
        }
    }

    fn pending_for(&self, instance_id: &InstanceId) -> Vec<u64> {
        lock(&self.table).owned_by(instance_id)
    }

    fn cancel_all(&self, instance_id: &InstanceId) -> usize {
        let mut table = lock(&self.table);
        let ids = table.owned_by(instance_id);
        ids.into_iter().filter(|id| table.cancel(*id)).count()
    }
}
