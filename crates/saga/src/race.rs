//! Event-or-timeout: race one signal against one durable timer.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::SagaError;
use crate::services::DurableTimer;

/// Which side of a race resolved first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "payload", rename_all = "snake_case")]
pub enum RaceOutcome<T> {
    /// The signal arrived before the deadline.
    Signaled(T),
    /// The deadline passed first.
    TimedOut,
}

impl<T> RaceOutcome<T> {
    /// Returns true if the signal won.
    pub fn is_signaled(&self) -> bool {
        matches!(self, RaceOutcome::Signaled(_))
    }

    /// Returns true if the timer won.
    pub fn is_timed_out(&self) -> bool {
        matches!(self, RaceOutcome::TimedOut)
    }

    /// Returns the signal payload, if the signal won.
    pub fn into_signal(self) -> Option<T> {
        match self {
            RaceOutcome::Signaled(payload) => Some(payload),
            RaceOutcome::TimedOut => None,
        }
    }

    /// Maps the signal payload.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RaceOutcome<U> {
        match self {
            RaceOutcome::Signaled(payload) => RaceOutcome::Signaled(f(payload)),
            RaceOutcome::TimedOut => RaceOutcome::TimedOut,
        }
    }
}

/// Waits for `signal` or `timer`, whichever resolves first.
///
/// If the signal wins the timer is canceled before this returns, so it never
/// fires. If the timer wins the signal future is dropped, which abandons the
/// wait without consuming a later signal. A [`SignalSubscription`] that
/// received a payload after its last poll returns it to the bus on drop.
/// When both are ready at once the signal wins.
///
/// [`SignalSubscription`]: crate::services::SignalSubscription
pub async fn race<T, S>(signal: S, timer: DurableTimer) -> Result<RaceOutcome<T>, SagaError>
where
    S: Future<Output = Result<T, SagaError>>,
{
    let timer_id = timer.id();
    tokio::pin!(signal);
    let mut timer = timer;

    let outcome = tokio::select! {
        biased;

        result = &mut signal => {
            timer.cancel();
            match result {
                Ok(payload) => RaceOutcome::Signaled(payload),
                Err(e) => {
                    metrics::counter!("race_outcomes_total", "outcome" => "error").increment(1);
                    return Err(e);
                }
            }
        }
        () = &mut timer => RaceOutcome::TimedOut,
    };

    let label = if outcome.is_signaled() { "signaled" } else { "timed_out" };
    metrics::counter!("race_outcomes_total", "outcome" => label).increment(1);
    tracing::debug!(timer_id, outcome = label, "race resolved");
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    use chrono::{Duration, Utc};
    use common::InstanceId;
    use serde_json::{Value, json};

    use crate::services::{InMemorySignalBus, InMemoryTimerService, SignalBus, TimerService};

    #[tokio::test(start_paused = true)]
    async fn test_signal_wins_and_cancels_timer() {
        let bus = InMemorySignalBus::new();
        let timers = InMemoryTimerService::new();
        let id = InstanceId::from_name("race-1");

        let subscription = bus.subscribe(&id, "MyEvent");
        let timer = timers.create_timer(&id, Utc::now() + Duration::minutes(1));
        let timer_id = timer.id();
        bus.raise(&id, "MyEvent", json!(42));

        let outcome = race(subscription, timer).await.unwrap();
        assert_eq!(outcome, RaceOutcome::Signaled(json!(42)));
        assert!(!timers.is_pending(timer_id));
        assert_eq!(timers.canceled_count(), 1);

        tokio::time::sleep(StdDuration::from_secs(120)).await;
        assert_eq!(timers.fired_count(), 0);
        assert!(timers.pending_for(&id).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_wins_and_later_signal_is_not_consumed() {
        let bus = InMemorySignalBus::new();
        let timers = InMemoryTimerService::new();
        let id = InstanceId::from_name("race-2");

        let subscription = bus.subscribe(&id, "MyEvent");
        let timer = timers.create_timer(&id, Utc::now() + Duration::minutes(1));

        let outcome = race(subscription, timer).await.unwrap();
        assert!(outcome.is_timed_out());
        assert_eq!(timers.fired_count(), 1);

        assert_eq!(
            bus.raise(&id, "MyEvent", json!(1)),
            crate::services::Delivery::Buffered
        );
        assert_eq!(bus.delivered_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_already_ready_beats_expired_timer() {
        let bus = InMemorySignalBus::new();
        let timers = InMemoryTimerService::new();
        let id = InstanceId::from_name("race-3");

        bus.raise(&id, "payEvent", json!(true));
        let subscription = bus.subscribe(&id, "payEvent");
        let timer = timers.create_timer(&id, Utc::now() - Duration::seconds(1));
        tokio::time::sleep(StdDuration::from_millis(10)).await;

        let outcome = race(subscription, timer).await.unwrap();
        assert_eq!(outcome.into_signal(), Some(json!(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_signal_cancels_timer_and_errors() {
        let bus = InMemorySignalBus::new();
        let timers = InMemoryTimerService::new();
        let id = InstanceId::from_name("race-4");

        let subscription = bus.subscribe(&id, "MyEvent");
        bus.discard(&id);
        let timer = timers.create_timer(&id, Utc::now() + Duration::minutes(1));

        let result = race(subscription, timer).await;
        assert!(matches!(result, Err(SagaError::SignalClosed { .. })));
        assert_eq!(timers.canceled_count(), 1);
    }

    #[test]
    fn test_outcome_map_and_serialization() {
        let outcome: RaceOutcome<Value> = RaceOutcome::Signaled(json!(7));
        assert_eq!(outcome.clone().map(|v| v == json!(7)), RaceOutcome::Signaled(true));
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({"outcome": "signaled", "payload": 7})
        );
        assert!(RaceOutcome::<u8>::TimedOut.map(|v| v + 1).is_timed_out());
    }
}
