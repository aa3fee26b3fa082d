//! The compensation stack: an ordered undo list drained last-in-first-out.

use std::future::Future;

use futures_util::future::BoxFuture;

use crate::error::SagaError;

/// A zero-argument undo action with its input already captured.
pub type CompensationAction = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), SagaError>> + Send>;

struct Compensation {
    step: String,
    action: CompensationAction,
}

/// The result of running one compensation while draining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompensationResult {
    /// The compensation ran successfully.
    Completed { step: String },
    /// The compensation failed; draining continued.
    Failed { step: String, error: String },
}

/// A compensation that failed during rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompensationFailure {
    /// The step whose compensation failed.
    pub step: String,
    /// The error reported by the compensation.
    pub error: String,
}

/// What a drain did, in the order it did it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompensationReport {
    /// Steps whose compensation succeeded.
    pub compensated: Vec<String>,
    /// Compensations that failed.
    pub failures: Vec<CompensationFailure>,
}

impl CompensationReport {
    /// Returns true if every compensation succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Returns how many compensations were invoked.
    pub fn attempted(&self) -> usize {
        self.compensated.len() + self.failures.len()
    }
}

/// Undo actions for successfully completed steps.
///
/// Entries are pushed only while a saga moves forward and are removed only by
/// draining, newest first. Each entry is invoked at most once, because
/// draining takes ownership of it.
#[derive(Default)]
pub struct CompensationStack {
    entries: Vec<Compensation>,
}

impl CompensationStack {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes the compensation for a step that just succeeded.
    pub fn push(&mut self, step: impl Into<String>, action: CompensationAction) {
        self.entries.push(Compensation {
            step: step.into(),
            action,
        });
    }

    /// Returns the number of pending compensations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing needs undoing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the step names in push order (bottom of the stack first).
    pub fn steps(&self) -> Vec<&str> {
        self.entries.iter().map(|c| c.step.as_str()).collect()
    }

    /// Drains the stack, invoking every compensation newest first.
    ///
    /// A failing compensation is logged and draining continues with the next
    /// entry. Draining an empty stack does nothing.
    pub async fn drain(&mut self) -> CompensationReport {
        self.drain_with(|_| async {}).await
    }

    /// Like [`drain`](Self::drain), calling `observe` after each compensation.
    ///
    /// Compensations run one at a time; `observe` completes before the next
    /// compensation starts.
    pub async fn drain_with<F, Fut>(&mut self, mut observe: F) -> CompensationReport
    where
        F: FnMut(CompensationResult) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut report = CompensationReport::default();

        while let Some(Compensation { step, action }) = self.entries.pop() {
            tracing::info!(step = %step, "running compensation");
            metrics::counter!("saga_compensations_total").increment(1);

            let result = match action().await {
                Ok(()) => {
                    report.compensated.push(step.clone());
                    CompensationResult::Completed { step }
                }
                Err(e) => {
                    metrics::counter!("saga_compensation_failures_total").increment(1);
                    tracing::warn!(step = %step, error = %e, "compensation failed, continuing rollback");
                    report.failures.push(CompensationFailure {
                        step: step.clone(),
                        error: e.to_string(),
                    });
                    CompensationResult::Failed {
                        step,
                        error: e.to_string(),
                    }
                }
            };
            observe(result).await;
        }

        report
    }
}

impl std::fmt::Debug for CompensationStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompensationStack")
            .field("steps", &self.steps())
            .finish()
    }
}
