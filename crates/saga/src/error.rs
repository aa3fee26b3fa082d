//! Saga error types.

use common::InstanceId;
use thiserror::Error;

/// Errors that can occur while hosting or executing workflows.
///
/// Domain failures ("no seats", "payment declined") are never errors: they
/// travel as `StepResult { succeeded: false }` values. Everything here is an
/// infrastructure failure or a misuse of the host.
#[derive(Debug, Error)]
pub enum SagaError {
    /// No operation is registered under the requested name.
    #[error("Operation not registered: {0}")]
    OperationNotFound(String),

    /// No workflow is registered under the requested name.
    #[error("Workflow not registered: {0}")]
    WorkflowNotFound(String),

    /// An operation could not be completed.
    #[error("Operation '{operation}' failed: {reason}")]
    OperationFailed { operation: String, reason: String },

    /// A sub-workflow instance ended in the failed state.
    #[error("Sub-workflow '{workflow}' ({instance_id}) failed: {reason}")]
    SubWorkflowFailed {
        workflow: String,
        instance_id: InstanceId,
        reason: String,
    },

    /// A workflow instance ended in the failed state.
    #[error("Instance {instance_id} failed: {reason}")]
    InstanceFailed {
        instance_id: InstanceId,
        reason: String,
    },

    /// The instance does not exist.
    #[error("Instance not found: {0}")]
    InstanceNotFound(InstanceId),

    /// An instance with this ID is already running.
    #[error("Instance already exists: {0}")]
    InstanceAlreadyExists(InstanceId),

    /// The instance tried to finish while it still owned pending durable timers.
    #[error("Instance {instance_id} exited with {count} pending timer(s)")]
    PendingTimers { instance_id: InstanceId, count: usize },

    /// The signal bus dropped a subscription before delivering a payload.
    #[error("Signal subscription for '{event}' closed without a payload")]
    SignalClosed { event: String },

    /// A fan-out branch panicked or was aborted before producing an outcome.
    #[error("Branch {index} did not complete: {reason}")]
    BranchAborted { index: usize, reason: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// Builds an `OperationFailed` error from any displayable reason.
    pub fn operation_failed(operation: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        SagaError::OperationFailed {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
