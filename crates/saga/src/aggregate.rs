//! Instance status rebuilt from history.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use common::InstanceId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::WorkflowEvent;
use crate::services::history::HistoryRecord;
use crate::state::InstanceState;

/// Status of a workflow instance, folded from its history events.
///
/// This is what status polling returns. Applying events is pure: the same
/// history always produces the same record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceRecord {
    instance_id: Option<InstanceId>,
    workflow: String,
    parent: Option<InstanceId>,
    input: Value,
    state: InstanceState,
    output: Option<Value>,
    completed_steps: Vec<String>,
    compensated_steps: Vec<String>,
    compensation_failures: Vec<String>,
    pending_timers: BTreeSet<u64>,
    children: Vec<InstanceId>,
    failure_reason: Option<String>,
    created_at: Option<DateTime<Utc>>,
    last_updated_at: Option<DateTime<Utc>>,
    history_len: usize,
}

impl InstanceRecord {
    /// Rebuilds a record by replaying history records in sequence order.
    pub fn from_history(records: &[HistoryRecord]) -> Self {
        let mut record = InstanceRecord::default();
        for entry in records {
            record.apply(entry.event.clone());
            record.last_updated_at = Some(entry.recorded_at);
            record.history_len += 1;
        }
        record
    }

    /// Applies an event to the record.
    pub fn apply(&mut self, event: WorkflowEvent) {
        match event {
            WorkflowEvent::InstanceStarted(data) => {
                // A reused id starts a fresh run; only the history length carries over.
                *self = InstanceRecord {
                    instance_id: Some(data.instance_id),
                    workflow: data.workflow,
                    parent: data.parent,
                    input: data.input,
                    state: InstanceState::Running,
                    created_at: Some(data.started_at),
                    last_updated_at: self.last_updated_at,
                    history_len: self.history_len,
                    ..InstanceRecord::default()
                };
            }
            WorkflowEvent::SagaStarted(_) | WorkflowEvent::StepStarted(_) => {}
            WorkflowEvent::StepCompleted(data) => {
                self.completed_steps.push(data.step_name);
            }
            WorkflowEvent::StepFailed(data) => {
                self.failure_reason = Some(data.error);
            }
            WorkflowEvent::CompensationStarted(_) => {
                if self.state.can_compensate() {
                    self.state = InstanceState::Compensating;
                }
            }
            WorkflowEvent::CompensationStepCompleted(data) => {
                self.compensated_steps.push(data.step_name);
            }
            WorkflowEvent::CompensationStepFailed(data) => {
                // Draining continues; the failure is only recorded.
                self.compensation_failures.push(data.step_name);
            }
            WorkflowEvent::SagaFinished(_) => {
                if self.state == InstanceState::Compensating {
                    self.state = InstanceState::Running;
                }
            }
            WorkflowEvent::TimerCreated(data) => {
                self.pending_timers.insert(data.timer_id);
            }
            WorkflowEvent::TimerFired(data) | WorkflowEvent::TimerCanceled(data) => {
                self.pending_timers.remove(&data.timer_id);
            }
            WorkflowEvent::EventReceived(_) => {}
            WorkflowEvent::SubWorkflowStarted(data) => {
                self.children.push(data.instance_id);
            }
            WorkflowEvent::InstanceCompleted(data) => {
                self.output = Some(data.output);
                self.state = InstanceState::Completed;
            }
            WorkflowEvent::InstanceFailed(data) => {
                self.failure_reason = Some(data.reason);
                self.state = InstanceState::Failed;
            }
        }
    }
}

// Query methods
impl InstanceRecord {
    /// Returns the instance ID, once started.
    pub fn instance_id(&self) -> Option<&InstanceId> {
        self.instance_id.as_ref()
    }

    /// Returns the registered workflow name.
    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    /// Returns the parent instance for sub-workflows.
    pub fn parent(&self) -> Option<&InstanceId> {
        self.parent.as_ref()
    }

    /// Returns the serialized input.
    pub fn input(&self) -> &Value {
        &self.input
    }

    /// Returns the runtime status.
    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// Returns the serialized output of a completed instance.
    pub fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    /// Returns the names of saga steps that reported success, in order.
    pub fn completed_steps(&self) -> &[String] {
        &self.completed_steps
    }

    /// Returns the names of steps whose compensation ran, in drain order.
    pub fn compensated_steps(&self) -> &[String] {
        &self.compensated_steps
    }

    /// Returns the names of steps whose compensation failed.
    pub fn compensation_failures(&self) -> &[String] {
        &self.compensation_failures
    }

    /// Returns the number of timers created but neither fired nor canceled.
    pub fn pending_timer_count(&self) -> usize {
        self.pending_timers.len()
    }

    /// Returns the child instances started by this instance.
    pub fn children(&self) -> &[InstanceId] {
        &self.children
    }

    /// Returns the failure reason, if any.
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// Returns when the instance started.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// Returns when the last history event was recorded.
    pub fn last_updated_at(&self) -> Option<DateTime<Utc>> {
        self.last_updated_at
    }

    /// Returns the number of history events folded into this record.
    pub fn history_len(&self) -> usize {
        self.history_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn started() -> InstanceRecord {
        let mut record = InstanceRecord::default();
        record.apply(WorkflowEvent::instance_started(
            InstanceId::from_name("booking-1"),
            "Saga",
            json!({"seats": [5, 7]}),
            None,
        ));
        record
    }

    #[test]
    fn test_default_record() {
        let record = InstanceRecord::default();
        assert!(record.instance_id().is_none());
        assert_eq!(record.state(), InstanceState::Pending);
        assert!(record.completed_steps().is_empty());
    }

    #[test]
    fn test_apply_instance_started() {
        let record = started();
        assert_eq!(record.instance_id().map(|id| id.as_str()), Some("booking-1"));
        assert_eq!(record.workflow(), "Saga");
        assert_eq!(record.input()["seats"], json!([5, 7]));
        assert_eq!(record.state(), InstanceState::Running);
    }

    #[test]
    fn test_apply_rollback_lifecycle() {
        let mut record = started();

        record.apply(WorkflowEvent::saga_started("booking", 3));
        record.apply(WorkflowEvent::step_started("book_seats"));
        record.apply(WorkflowEvent::step_completed("book_seats", None));
        record.apply(WorkflowEvent::step_started("pay"));
        record.apply(WorkflowEvent::step_failed("pay", "payment declined"));
        assert_eq!(record.failure_reason(), Some("payment declined"));

        record.apply(WorkflowEvent::compensation_started("pay", 1));
        assert_eq!(record.state(), InstanceState::Compensating);

        record.apply(WorkflowEvent::compensation_step_completed("book_seats"));
        record.apply(WorkflowEvent::saga_finished("booking", false));
        assert_eq!(record.state(), InstanceState::Running);
        assert_eq!(record.completed_steps(), &["book_seats"]);
        assert_eq!(record.compensated_steps(), &["book_seats"]);

        record.apply(WorkflowEvent::instance_completed(json!({"succeeded": false})));
        assert_eq!(record.state(), InstanceState::Completed);
        assert!(record.state().is_terminal());
    }

    #[test]
    fn test_restart_discards_previous_run() {
        let mut record = started();
        record.apply(WorkflowEvent::step_completed("book_seats", None));
        record.apply(WorkflowEvent::timer_created(7, Utc::now()));
        record.apply(WorkflowEvent::instance_failed("payment declined"));

        record.apply(WorkflowEvent::instance_started(
            InstanceId::from_name("booking-1"),
            "Saga",
            json!("second"),
            None,
        ));

        assert_eq!(record.state(), InstanceState::Running);
        assert_eq!(record.input(), &json!("second"));
        assert!(record.output().is_none());
        assert!(record.failure_reason().is_none());
        assert!(record.completed_steps().is_empty());
        assert_eq!(record.pending_timer_count(), 0);
    }

    #[test]
    fn test_compensation_failure_does_not_change_state() {
        let mut record = started();
        record.apply(WorkflowEvent::compensation_started("register", 2));
        record.apply(WorkflowEvent::compensation_step_failed("pay", "unreachable"));

        assert_eq!(record.state(), InstanceState::Compensating);
        assert_eq!(record.compensation_failures(), &["pay"]);
    }

    #[test]
    fn test_timer_tracking() {
        let mut record = started();
        let fire_at = Utc::now();

        record.apply(WorkflowEvent::timer_created(1, fire_at));
        record.apply(WorkflowEvent::timer_created(2, fire_at));
        assert_eq!(record.pending_timer_count(), 2);

        record.apply(WorkflowEvent::timer_canceled(1, fire_at));
        record.apply(WorkflowEvent::timer_fired(2, fire_at));
        assert_eq!(record.pending_timer_count(), 0);
    }

    #[test]
    fn test_instance_failed() {
        let mut record = started();
        record.apply(WorkflowEvent::instance_failed("Operation not registered: Nope"));

        assert_eq!(record.state(), InstanceState::Failed);
        assert_eq!(record.failure_reason(), Some("Operation not registered: Nope"));
    }

    #[test]
    fn test_from_history_tracks_length_and_timestamps() {
        let id = InstanceId::from_name("chain-1");
        let now = Utc::now();
        let records = vec![
            HistoryRecord::new(
                1,
                id.clone(),
                WorkflowEvent::instance_started(id.clone(), "CallChain", json!("111"), None),
                now,
            ),
            HistoryRecord::new(
                2,
                id.clone(),
                WorkflowEvent::instance_completed(json!("Wrapped data [Formatted data 111]")),
                now,
            ),
        ];

        let record = InstanceRecord::from_history(&records);
        assert_eq!(record.history_len(), 2);
        assert_eq!(record.last_updated_at(), Some(now));
        assert_eq!(
            record.output(),
            Some(&json!("Wrapped data [Formatted data 111]"))
        );
    }
}
