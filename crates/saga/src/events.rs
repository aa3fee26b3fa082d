//! Workflow history events.

use chrono::{DateTime, Utc};
use common::InstanceId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Facts recorded in a workflow instance's history.
///
/// History is append-only and is folded into an
/// [`InstanceRecord`](crate::aggregate::InstanceRecord) to answer status
/// queries. It is an audit trail, not a replay log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WorkflowEvent {
    /// The instance was started with its input.
    InstanceStarted(InstanceStartedData),

    /// A saga began executing its steps.
    SagaStarted(SagaData),

    /// A saga step started its forward operation.
    StepStarted(StepData),

    /// A saga step's forward operation reported success.
    StepCompleted(StepCompletedData),

    /// A saga step reported a domain failure or its operation failed.
    StepFailed(StepFailedData),

    /// Rollback started after a step failure.
    CompensationStarted(CompensationData),

    /// A compensation ran successfully.
    CompensationStepCompleted(StepData),

    /// A compensation failed (logged, draining continues).
    CompensationStepFailed(StepFailedData),

    /// A saga finished, successfully or after rollback.
    SagaFinished(SagaFinishedData),

    /// A durable timer was created.
    TimerCreated(TimerData),

    /// A durable timer fired.
    TimerFired(TimerData),

    /// A durable timer was canceled before firing.
    TimerCanceled(TimerData),

    /// An external event was received by a waiting subscription.
    EventReceived(EventData),

    /// A child workflow instance was started.
    SubWorkflowStarted(SubWorkflowData),

    /// The workflow returned a value.
    InstanceCompleted(InstanceCompletedData),

    /// The workflow returned an error.
    InstanceFailed(InstanceFailedData),
}

impl WorkflowEvent {
    /// Returns the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            WorkflowEvent::InstanceStarted(_) => "InstanceStarted",
            WorkflowEvent::SagaStarted(_) => "SagaStarted",
            WorkflowEvent::StepStarted(_) => "StepStarted",
            WorkflowEvent::StepCompleted(_) => "StepCompleted",
            WorkflowEvent::StepFailed(_) => "StepFailed",
            WorkflowEvent::CompensationStarted(_) => "CompensationStarted",
            WorkflowEvent::CompensationStepCompleted(_) => "CompensationStepCompleted",
            WorkflowEvent::CompensationStepFailed(_) => "CompensationStepFailed",
            WorkflowEvent::SagaFinished(_) => "SagaFinished",
            WorkflowEvent::TimerCreated(_) => "TimerCreated",
            WorkflowEvent::TimerFired(_) => "TimerFired",
            WorkflowEvent::TimerCanceled(_) => "TimerCanceled",
            WorkflowEvent::EventReceived(_) => "EventReceived",
            WorkflowEvent::SubWorkflowStarted(_) => "SubWorkflowStarted",
            WorkflowEvent::InstanceCompleted(_) => "InstanceCompleted",
            WorkflowEvent::InstanceFailed(_) => "InstanceFailed",
        }
    }
}

/// Data for InstanceStarted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceStartedData {
    /// The instance ID.
    pub instance_id: InstanceId,
    /// The registered workflow name.
    pub workflow: String,
    /// The serialized input.
    pub input: Value,
    /// The parent instance, for sub-workflows.
    pub parent: Option<InstanceId>,
    /// When the instance started.
    pub started_at: DateTime<Utc>,
}

/// Data for saga started events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaData {
    /// The saga definition name.
    pub saga_name: String,
    /// Number of declared steps.
    pub step_count: usize,
}

/// Data for step started and compensation completed events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepData {
    /// The step name.
    pub step_name: String,
}

/// Data for StepCompleted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCompletedData {
    /// The step name.
    pub step_name: String,
    /// The step's payload, if it reported one.
    pub payload: Option<Value>,
}

/// Data for step and compensation failure events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFailedData {
    /// The step that failed.
    pub step_name: String,
    /// Error message describing the failure.
    pub error: String,
}

/// Data for CompensationStarted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationData {
    /// The step that triggered compensation.
    pub from_step: String,
    /// Number of compensations waiting on the stack.
    pub pending: usize,
}

/// Data for SagaFinished event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaFinishedData {
    /// The saga definition name.
    pub saga_name: String,
    /// Whether every step succeeded.
    pub succeeded: bool,
}

/// Data for timer events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerData {
    /// The timer ID, unique within the host.
    pub timer_id: u64,
    /// The absolute deadline.
    pub fire_at: DateTime<Utc>,
}

/// Data for EventReceived event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    /// The external event name.
    pub event_name: String,
    /// The delivered payload.
    pub payload: Value,
}

/// Data for SubWorkflowStarted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubWorkflowData {
    /// The registered workflow name of the child.
    pub workflow: String,
    /// The child instance ID.
    pub instance_id: InstanceId,
}

/// Data for InstanceCompleted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceCompletedData {
    /// The serialized workflow output.
    pub output: Value,
    /// When the instance completed.
    pub completed_at: DateTime<Utc>,
}

/// Data for InstanceFailed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceFailedData {
    /// Reason for failure.
    pub reason: String,
    /// When the instance failed.
    pub failed_at: DateTime<Utc>,
}

// Convenience constructors
impl WorkflowEvent {
    /// Creates an InstanceStarted event.
    pub fn instance_started(
        instance_id: InstanceId,
        workflow: impl Into<String>,
        input: Value,
        parent: Option<InstanceId>,
    ) -> Self {
        WorkflowEvent::InstanceStarted(InstanceStartedData {
            instance_id,
            workflow: workflow.into(),
            input,
            parent,
            started_at: Utc::now(),
        })
    }

    /// Creates a SagaStarted event.
    pub fn saga_started(saga_name: impl Into<String>, step_count: usize) -> Self {
        WorkflowEvent::SagaStarted(SagaData {
            saga_name: saga_name.into(),
            step_count,
        })
    }

    /// Creates a StepStarted event.
    pub fn step_started(step_name: impl Into<String>) -> Self {
        WorkflowEvent::StepStarted(StepData {
            step_name: step_name.into(),
        })
    }

    /// Creates a StepCompleted event.
    pub fn step_completed(step_name: impl Into<String>, payload: Option<Value>) -> Self {
        WorkflowEvent::StepCompleted(StepCompletedData {
            step_name: step_name.into(),
            payload,
        })
    }

    /// Creates a StepFailed event.
    pub fn step_failed(step_name: impl Into<String>, error: impl Into<String>) -> Self {
        WorkflowEvent::StepFailed(StepFailedData {
            step_name: step_name.into(),
            error: error.into(),
        })
    }

    /// Creates a CompensationStarted event.
    pub fn compensation_started(from_step: impl Into<String>, pending: usize) -> Self {
        WorkflowEvent::CompensationStarted(CompensationData {
            from_step: from_step.into(),
            pending,
        })
    }

    /// Creates a CompensationStepCompleted event.
    pub fn compensation_step_completed(step_name: impl Into<String>) -> Self {
        WorkflowEvent::CompensationStepCompleted(StepData {
            step_name: step_name.into(),
        })
    }

    /// Creates a CompensationStepFailed event.
    pub fn compensation_step_failed(
        step_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        WorkflowEvent::CompensationStepFailed(StepFailedData {
            step_name: step_name.into(),
            error: error.into(),
        })
    }

    /// Creates a SagaFinished event.
    pub fn saga_finished(saga_name: impl Into<String>, succeeded: bool) -> Self {
        WorkflowEvent::SagaFinished(SagaFinishedData {
            saga_name: saga_name.into(),
            succeeded,
        })
    }

    /// Creates a TimerCreated event.
    pub fn timer_created(timer_id: u64, fire_at: DateTime<Utc>) -> Self {
        WorkflowEvent::TimerCreated(TimerData { timer_id, fire_at })
    }

    /// Creates a TimerFired event.
    pub fn timer_fired(timer_id: u64, fire_at: DateTime<Utc>) -> Self {
        WorkflowEvent::TimerFired(TimerData { timer_id, fire_at })
    }

    /// Creates a TimerCanceled event.
    pub fn timer_canceled(timer_id: u64, fire_at: DateTime<Utc>) -> Self {
        WorkflowEvent::TimerCanceled(TimerData { timer_id, fire_at })
    }

    /// Creates an EventReceived event.
    pub fn event_received(event_name: impl Into<String>, payload: Value) -> Self {
        WorkflowEvent::EventReceived(EventData {
            event_name: event_name.into(),
            payload,
        })
    }

    /// Creates a SubWorkflowStarted event.
    pub fn sub_workflow_started(workflow: impl Into<String>, instance_id: InstanceId) -> Self {
        WorkflowEvent::SubWorkflowStarted(SubWorkflowData {
            workflow: workflow.into(),
            instance_id,
        })
    }

    /// Creates an InstanceCompleted event.
    pub fn instance_completed(output: Value) -> Self {
        WorkflowEvent::InstanceCompleted(InstanceCompletedData {
            output,
            completed_at: Utc::now(),
        })
    }

    /// Creates an InstanceFailed event.
    pub fn instance_failed(reason: impl Into<String>) -> Self {
        WorkflowEvent::InstanceFailed(InstanceFailedData {
            reason: reason.into(),
            failed_at: Utc::now(),
        })
    }
}
