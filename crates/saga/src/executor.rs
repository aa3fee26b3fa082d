//! The saga executor: forward progress in declared order, rollback on first failure.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::compensation::{CompensationFailure, CompensationResult, CompensationStack};
use crate::dispatch::Dispatcher;
use crate::error::SagaError;
use crate::events::WorkflowEvent;
use crate::step::{SagaDefinition, StepContext, StepFailure};

/// The terminal result of one saga run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaOutcome {
    /// True if every step succeeded.
    pub succeeded: bool,
    /// The final step's payload on success; always `None` after rollback.
    pub result_payload: Option<Value>,
}

impl SagaOutcome {
    /// A successful outcome.
    pub fn completed(result_payload: Option<Value>) -> Self {
        Self {
            succeeded: true,
            result_payload,
        }
    }

    /// A rolled-back outcome.
    pub fn failed() -> Self {
        Self {
            succeeded: false,
            result_payload: None,
        }
    }

    /// Decodes the result payload.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<Option<T>, SagaError> {
        self.result_payload
            .as_ref()
            .map(|value| T::deserialize(value))
            .transpose()
            .map_err(SagaError::from)
    }
}

/// A saga outcome together with what happened on the way.
#[derive(Debug, Clone)]
pub struct SagaRun {
    /// The terminal outcome.
    pub outcome: SagaOutcome,
    /// The step that stopped forward progress, if any.
    pub failed_step: Option<String>,
    /// Compensations left on the stack (non-zero only on success).
    pub pending_compensations: usize,
    /// Steps compensated during rollback, in drain order.
    pub compensated: Vec<String>,
    /// Compensations that failed during rollback.
    pub compensation_failures: Vec<CompensationFailure>,
}

/// Drives a [`SagaDefinition`] against a [`Dispatcher`].
///
/// Steps run strictly one after another. The first step that reports
/// `succeeded: false`, or whose call fails, stops forward progress; the
/// compensations pushed so far are then drained newest first. Branching
/// depends only on step results, so re-running the same saga over the same
/// results takes the same path.
#[derive(Clone)]
pub struct SagaExecutor {
    dispatcher: Arc<dyn Dispatcher>,
}

impl SagaExecutor {
    /// Creates an executor dispatching through `dispatcher`.
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Runs the saga and returns its outcome.
    pub async fn run(&self, saga: &SagaDefinition, input: Value) -> SagaOutcome {
        self.run_detailed(saga, input).await.outcome
    }

    /// Runs the saga and returns its outcome with a rollback report.
    #[tracing::instrument(skip(self, saga, input), fields(saga = %saga.name()))]
    pub async fn run_detailed(&self, saga: &SagaDefinition, input: Value) -> SagaRun {
        metrics::counter!("saga_executions_total").increment(1);
        let saga_start = std::time::Instant::now();

        self.dispatcher
            .record(WorkflowEvent::saga_started(saga.name(), saga.steps().len()))
            .await;

        let mut stack = CompensationStack::new();
        let mut payloads: HashMap<String, Value> = HashMap::new();
        let mut current = input.clone();
        let mut last_payload: Option<Value> = None;
        let mut failed_step: Option<String> = None;

        for step in saga.steps() {
            tracing::info!(step = step.name(), forward = %step.forward(), "saga step started");
            self.dispatcher
                .record(WorkflowEvent::step_started(step.name()))
                .await;

            let ctx = StepContext::new(&input, &current, &payloads);
            match step.execute(&self.dispatcher, &ctx, &mut stack).await {
                Ok(payload) => {
                    self.dispatcher
                        .record(WorkflowEvent::step_completed(step.name(), payload.clone()))
                        .await;
                    let value = payload.clone().unwrap_or(Value::Null);
                    payloads.insert(step.name().to_string(), value.clone());
                    current = value;
                    last_payload = payload;
                }
                Err(failure) => {
                    match &failure {
                        StepFailure::Declined => {
                            tracing::info!(step = step.name(), "saga step declined")
                        }
                        StepFailure::Errored(e) => {
                            tracing::warn!(step = step.name(), error = %e, "saga step errored")
                        }
                    }
                    self.dispatcher
                        .record(WorkflowEvent::step_failed(step.name(), failure.to_string()))
                        .await;
                    failed_step = Some(step.name().to_string());
                    break;
                }
            }
        }

        let Some(failed) = failed_step else {
            self.dispatcher
                .record(WorkflowEvent::saga_finished(saga.name(), true))
                .await;
            metrics::histogram!("saga_duration_seconds").record(saga_start.elapsed().as_secs_f64());
            metrics::counter!("saga_completed").increment(1);
            tracing::info!(pending = stack.len(), "saga completed successfully");

            return SagaRun {
                outcome: SagaOutcome::completed(last_payload),
                failed_step: None,
                pending_compensations: stack.len(),
                compensated: Vec::new(),
                compensation_failures: Vec::new(),
            };
        };

        self.dispatcher
            .record(WorkflowEvent::compensation_started(&failed, stack.len()))
            .await;

        let dispatcher = Arc::clone(&self.dispatcher);
        let report = stack
            .drain_with(|result| {
                let dispatcher = Arc::clone(&dispatcher);
                async move {
                    let event = match result {
                        CompensationResult::Completed { step } => {
                            WorkflowEvent::compensation_step_completed(step)
                        }
                        CompensationResult::Failed { step, error } => {
                            WorkflowEvent::compensation_step_failed(step, error)
                        }
                    };
                    dispatcher.record(event).await;
                }
            })
            .await;

        self.dispatcher
            .record(WorkflowEvent::saga_finished(saga.name(), false))
            .await;
        metrics::histogram!("saga_duration_seconds").record(saga_start.elapsed().as_secs_f64());
        metrics::counter!("saga_failed").increment(1);
        tracing::warn!(
            failed_step = %failed,
            compensated = report.compensated.len(),
            compensation_failures = report.failures.len(),
            "saga rolled back"
        );

        SagaRun {
            outcome: SagaOutcome::failed(),
            failed_step: Some(failed),
            pending_compensations: 0,
            compensated: report.compensated,
            compensation_failures: report.failures,
        }
    }
}
