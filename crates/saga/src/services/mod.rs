//! Host collaborators: signals, timers, history and time.
//!
//! Each collaborator is a trait with an in-memory implementation that
//! exposes counters for tests.

pub mod clock;
pub mod history;
pub mod signals;
pub mod timers;

pub use clock::{Clock, FixedClock, SystemClock};
pub use history::{HistoryRecord, HistoryStore, InMemoryHistoryStore};
pub use signals::{Delivery, InMemorySignalBus, SignalBus, SignalSubscription};
pub use timers::{DurableTimer, InMemoryTimerService, TimerService};
