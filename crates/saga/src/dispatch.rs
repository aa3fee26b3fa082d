//! The boundary between saga logic and the hosting runtime.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SagaError;
use crate::events::WorkflowEvent;

/// Invokes named operations and sub-workflows on behalf of a workflow instance.
///
/// The saga executor and chain composer only ever talk to this trait. Calls
/// block (asynchronously) until the host resolves them to a payload or an
/// error; retrying is the host's business.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Calls a registered operation.
    async fn call_operation(&self, name: &str, input: Value) -> Result<Value, SagaError>;

    /// Runs a registered workflow as a child instance and returns its output.
    async fn call_sub_workflow(&self, name: &str, input: Value) -> Result<Value, SagaError>;

    /// Records a history event for the calling instance.
    async fn record(&self, _event: WorkflowEvent) {}
}

/// How a step's forward call is dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// A registered operation (activity).
    Operation(String),
    /// A registered workflow run as a child instance.
    SubWorkflow(String),
}

impl Invocation {
    /// Creates an operation invocation.
    pub fn operation(name: impl Into<String>) -> Self {
        Invocation::Operation(name.into())
    }

    /// Creates a sub-workflow invocation.
    pub fn sub_workflow(name: impl Into<String>) -> Self {
        Invocation::SubWorkflow(name.into())
    }

    /// Returns the operation or workflow name.
    pub fn name(&self) -> &str {
        match self {
            Invocation::Operation(name) | Invocation::SubWorkflow(name) => name,
        }
    }

    /// Dispatches the call.
    pub async fn invoke(&self, dispatcher: &dyn Dispatcher, input: Value) -> Result<Value, SagaError> {
        match self {
            Invocation::Operation(name) => dispatcher.call_operation(name, input).await,
            Invocation::SubWorkflow(name) => dispatcher.call_sub_workflow(name, input).await,
        }
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Invocation::Operation(name) => write!(f, "operation '{name}'"),
            Invocation::SubWorkflow(name) => write!(f, "sub-workflow '{name}'"),
        }
    }
}
