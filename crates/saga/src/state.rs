//! Workflow instance runtime status.

use serde::{Deserialize, Serialize};

/// The runtime status of a workflow instance, as seen by status polling.
///
/// State transitions:
/// ```text
/// Pending ──► Running ──┬──────────────────────► Completed
///                       ├──► Compensating ──► Running
///                       └──────────────────────► Failed
/// ```
///
/// `Compensating` returns to `Running` because a saga that rolled back still
/// hands a (failed) outcome back to its workflow, which then completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum InstanceState {
    /// The instance was accepted but has not started executing.
    #[default]
    Pending,

    /// Workflow code is executing or suspended on an awaited operation.
    Running,

    /// A saga inside the instance is draining its compensation stack.
    Compensating,

    /// The workflow returned a value (terminal state).
    Completed,

    /// The workflow returned an error (terminal state).
    Failed,
}

impl InstanceState {
    /// Returns true if the instance can begin running.
    pub fn can_run(&self) -> bool {
        matches!(self, InstanceState::Pending)
    }

    /// Returns true if a saga inside the instance can begin compensation.
    pub fn can_compensate(&self) -> bool {
        matches!(self, InstanceState::Running)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceState::Completed | InstanceState::Failed)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Pending => "Pending",
            InstanceState::Running => "Running",
            InstanceState::Compensating => "Compensating",
            InstanceState::Completed => "Completed",
            InstanceState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
