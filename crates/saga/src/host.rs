//! The workflow host: starts instances, tracks their status and routes signals.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::InstanceId;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tracing::Instrument;

use crate::aggregate::InstanceRecord;
use crate::context::WorkflowContext;
use crate::error::SagaError;
use crate::events::WorkflowEvent;
use crate::registry::{OperationRegistry, WorkflowRegistry};
use crate::services::{
    Clock, Delivery, HistoryStore, InMemoryHistoryStore, InMemorySignalBus, InMemoryTimerService,
    SignalBus, SystemClock, TimerService,
};
use crate::state::InstanceState;

/// How the host retries failed operation calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// A single attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    /// Up to `max_attempts` attempts with a fixed delay.
    pub fn fixed(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// A snapshot of one instance, as returned by status polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceStatus {
    /// The instance being described.
    pub instance_id: InstanceId,
    /// Registered workflow name.
    pub workflow: String,
    /// Lifecycle state of the latest run.
    pub runtime_status: InstanceState,
    /// The instance that started this one as a sub-workflow.
    pub parent: Option<InstanceId>,
    /// Input of the latest run.
    pub input: Value,
    /// Output, once completed.
    pub output: Option<Value>,
    /// Last step error or the reason the instance failed.
    pub failure_reason: Option<String>,
    /// Saga steps whose forward call succeeded.
    pub completed_steps: Vec<String>,
    /// Saga steps undone during rollback.
    pub compensated_steps: Vec<String>,
    /// Sub-workflow instances started by this one.
    pub children: Vec<InstanceId>,
    /// When the latest run started.
    pub created_at: Option<DateTime<Utc>>,
    /// When the last history event was recorded.
    pub last_updated_at: Option<DateTime<Utc>>,
    /// Total history events recorded under this ID, across runs.
    pub history_len: usize,
}

impl InstanceStatus {
    fn from_record(instance_id: InstanceId, record: &InstanceRecord) -> Self {
        Self {
            instance_id,
            workflow: record.workflow().to_string(),
            runtime_status: record.state(),
            parent: record.parent().cloned(),
            input: record.input().clone(),
            output: record.output().cloned(),
            failure_reason: record.failure_reason().map(str::to_string),
            completed_steps: record.completed_steps().to_vec(),
            compensated_steps: record.compensated_steps().to_vec(),
            children: record.children().to_vec(),
            created_at: record.created_at(),
            last_updated_at: record.last_updated_at(),
            history_len: record.history_len(),
        }
    }
}

type Completion = Option<Result<Value, String>>;

struct HostInner {
    operations: OperationRegistry,
    workflows: WorkflowRegistry,
    history: Arc<dyn HistoryStore>,
    signals: Arc<dyn SignalBus>,
    timers: Arc<dyn TimerService>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    /// Completion channels of running instances only.
    completions: Mutex<HashMap<InstanceId, watch::Receiver<Completion>>>,
}

/// Hosts workflow instances.
///
/// Each instance runs as its own tokio task. The host owns the collaborator
/// services (history, signals, timers and clock) and is the only place that
/// knows how operations and sub-workflows are resolved.
#[derive(Clone)]
pub struct WorkflowHost {
    inner: Arc<HostInner>,
}

/// Builder for [`WorkflowHost`]. Collaborators default to in-memory implementations.
pub struct WorkflowHostBuilder {
    operations: OperationRegistry,
    workflows: WorkflowRegistry,
    history: Option<Arc<dyn HistoryStore>>,
    signals: Option<Arc<dyn SignalBus>>,
    timers: Option<Arc<dyn TimerService>>,
    clock: Option<Arc<dyn Clock>>,
    retry: RetryPolicy,
}

impl WorkflowHostBuilder {
    /// Uses `history` to record instance events.
    pub fn with_history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    /// Uses `signals` to route raised events.
    pub fn with_signals(mut self, signals: Arc<dyn SignalBus>) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Uses `timers` for durable timers.
    pub fn with_timers(mut self, timers: Arc<dyn TimerService>) -> Self {
        self.timers = Some(timers);
        self
    }

    /// Uses `clock` as the source of workflow time.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets how failed operation calls are retried.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Builds the host.
    pub fn build(self) -> WorkflowHost {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let timers = self
            .timers
            .unwrap_or_else(|| Arc::new(InMemoryTimerService::with_clock(Arc::clone(&clock))));

        WorkflowHost {
            inner: Arc::new(HostInner {
                operations: self.operations,
                workflows: self.workflows,
                history: self
                    .history
                    .unwrap_or_else(|| Arc::new(InMemoryHistoryStore::new())),
                signals: self
                    .signals
                    .unwrap_or_else(|| Arc::new(InMemorySignalBus::new())),
                timers,
                clock,
                retry: self.retry,
                completions: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl WorkflowHost {
    /// Starts building a host over the given registries.
    pub fn builder(operations: OperationRegistry, workflows: WorkflowRegistry) -> WorkflowHostBuilder {
        WorkflowHostBuilder {
            operations,
            workflows,
            history: None,
            signals: None,
            timers: None,
            clock: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Creates a host with in-memory collaborators.
    pub fn new(operations: OperationRegistry, workflows: WorkflowRegistry) -> Self {
        Self::builder(operations, workflows).build()
    }

    /// Starts a workflow under a fresh instance ID.
    pub async fn start(&self, workflow: &str, input: impl Serialize) -> Result<InstanceId, SagaError> {
        self.start_with_id(workflow, InstanceId::new(), input).await
    }

    /// Starts a workflow under a caller-chosen instance ID.
    ///
    /// Reusing the ID of a running instance fails with
    /// [`SagaError::InstanceAlreadyExists`]; a finished instance's ID may be reused.
    pub async fn start_with_id(
        &self,
        workflow: &str,
        instance_id: InstanceId,
        input: impl Serialize,
    ) -> Result<InstanceId, SagaError> {
        let input = serde_json::to_value(input)?;
        self.launch(workflow, instance_id.clone(), input, None).await?;
        Ok(instance_id)
    }

    /// Returns the current status of an instance, or `None` if it never started.
    pub async fn status(&self, instance_id: &InstanceId) -> Result<Option<InstanceStatus>, SagaError> {
        let history = self.inner.history.history(instance_id).await?;
        if history.is_empty() {
            return Ok(None);
        }
        let record = InstanceRecord::from_history(&history);
        Ok(Some(InstanceStatus::from_record(instance_id.clone(), &record)))
    }

    /// Returns the IDs of every instance the history store knows about.
    pub async fn list(&self) -> Result<Vec<InstanceId>, SagaError> {
        self.inner.history.instances().await
    }

    /// Waits until an instance is terminal and returns its output.
    ///
    /// Finished instances are answered from history.
    pub async fn wait_for_completion(&self, instance_id: &InstanceId) -> Result<Value, SagaError> {
        let failed = |reason| SagaError::InstanceFailed {
            instance_id: instance_id.clone(),
            reason,
        };

        if let Some(receiver) = self.completion_receiver(instance_id) {
            return completion(receiver).await.map_err(failed);
        }

        match self.status(instance_id).await? {
            Some(status) if status.runtime_status == InstanceState::Completed => {
                Ok(status.output.unwrap_or(Value::Null))
            }
            Some(status) if status.runtime_status == InstanceState::Failed => Err(failed(
                status
                    .failure_reason
                    .unwrap_or_else(|| "instance failed".to_string()),
            )),
            _ => Err(SagaError::InstanceNotFound(instance_id.clone())),
        }
    }

    /// Raises a named signal on a running instance.
    #[tracing::instrument(skip(self, instance_id, payload), fields(instance_id = %instance_id))]
    pub async fn raise_event(
        &self,
        instance_id: &InstanceId,
        event: &str,
        payload: impl Serialize,
    ) -> Result<Delivery, SagaError> {
        let payload = serde_json::to_value(payload)?;

        // Held across the raise so the instance cannot settle in between.
        let completions = self.lock_completions();
        let running = completions
            .get(instance_id)
            .is_some_and(|receiver| receiver.borrow().is_none());
        if !running {
            tracing::warn!(event, "signal raised for an instance that is not running");
            return Err(SagaError::InstanceNotFound(instance_id.clone()));
        }
        let delivery = self.inner.signals.raise(instance_id, event, payload);
        drop(completions);

        tracing::info!(event, ?delivery, "signal raised");
        Ok(delivery)
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub(crate) fn signals(&self) -> &Arc<dyn SignalBus> {
        &self.inner.signals
    }

    pub(crate) fn timers(&self) -> &Arc<dyn TimerService> {
        &self.inner.timers
    }

    /// Calls an operation under the host's retry policy.
    pub(crate) async fn call_operation(&self, name: &str, input: Value) -> Result<Value, SagaError> {
        let max_attempts = self.inner.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.inner.operations.call(name, input.clone()).await {
                Ok(output) => return Ok(output),
                Err(e @ (SagaError::OperationNotFound(_) | SagaError::Serialization(_))) => {
                    return Err(e);
                }
                Err(e) if attempt < max_attempts => {
                    tracing::warn!(operation = name, attempt, error = %e, "operation failed, retrying");
                    tokio::time::sleep(self.inner.retry.backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Appends an event to an instance's history. Failures are logged, not raised.
    pub(crate) async fn record(&self, instance_id: &InstanceId, event: WorkflowEvent) {
        let event_type = event.event_type();
        if let Err(e) = self.inner.history.append(instance_id, event).await {
            tracing::warn!(%instance_id, event_type, error = %e, "failed to record history event");
        }
    }

    /// Registers and spawns an instance. Returns a receiver that resolves on completion.
    pub(crate) async fn launch(
        &self,
        workflow: &str,
        instance_id: InstanceId,
        input: Value,
        parent: Option<InstanceId>,
    ) -> Result<watch::Receiver<Completion>, SagaError> {
        let handler = self
            .inner
            .workflows
            .get(workflow)
            .ok_or_else(|| SagaError::WorkflowNotFound(workflow.to_string()))?;

        let (sender, receiver) = watch::channel(None);
        {
            let mut completions = self.lock_completions();
            if completions
                .get(&instance_id)
                .is_some_and(|existing| existing.borrow().is_none())
            {
                return Err(SagaError::InstanceAlreadyExists(instance_id));
            }
            completions.insert(instance_id.clone(), receiver.clone());
        }

        self.record(
            &instance_id,
            WorkflowEvent::instance_started(instance_id.clone(), workflow, input.clone(), parent.clone()),
        )
        .await;
        metrics::counter!("workflow_instances_started_total", "workflow" => workflow.to_string())
            .increment(1);
        tracing::info!(%instance_id, workflow, "instance started");

        let span = tracing::info_span!("instance", %instance_id, workflow);
        let ctx = WorkflowContext::new(self.clone(), instance_id.clone(), workflow, input, parent);
        let host = self.clone();
        tokio::spawn(
            async move {
                let result = match AssertUnwindSafe(handler(ctx)).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => Err(SagaError::InstanceFailed {
                        instance_id: instance_id.clone(),
                        reason: "workflow panicked".to_string(),
                    }),
                };
                let completion = host.finish(&instance_id, result).await;
                host.settle(&instance_id, &sender, completion);
            }
            .instrument(span),
        );

        Ok(receiver)
    }

    async fn finish(
        &self,
        instance_id: &InstanceId,
        result: Result<Value, SagaError>,
    ) -> Result<Value, String> {
        let pending = self.inner.timers.pending_for(instance_id);
        let result = if pending.is_empty() {
            result
        } else {
            let count = self.inner.timers.cancel_all(instance_id);
            tracing::error!(count, timers = ?pending, "instance exited with pending timers");
            Err(SagaError::PendingTimers {
                instance_id: instance_id.clone(),
                count,
            })
        };

        match result {
            Ok(output) => {
                self.record(instance_id, WorkflowEvent::instance_completed(output.clone()))
                    .await;
                tracing::info!("instance completed");
                Ok(output)
            }
            Err(e) => {
                let reason = e.to_string();
                self.record(instance_id, WorkflowEvent::instance_failed(reason.clone()))
                    .await;
                tracing::warn!(error = %reason, "instance failed");
                Err(reason)
            }
        }
    }

    /// Publishes the result and forgets the instance.
    ///
    /// Runs under the completions lock, so a concurrent `raise_event` either
    /// lands before the discard or sees the instance as gone.
    fn settle(
        &self,
        instance_id: &InstanceId,
        sender: &watch::Sender<Completion>,
        completion: Result<Value, String>,
    ) {
        let mut completions = self.lock_completions();
        let dropped = self.inner.signals.discard(instance_id);
        if dropped > 0 {
            tracing::debug!(dropped, "discarded unconsumed signals");
        }
        let _ = sender.send(Some(completion));
        completions.remove(instance_id);
    }

    fn lock_completions(&self) -> MutexGuard<'_, HashMap<InstanceId, watch::Receiver<Completion>>> {
        self.inner
            .completions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn completion_receiver(&self, instance_id: &InstanceId) -> Option<watch::Receiver<Completion>> {
        self.lock_completions().get(instance_id).cloned()
    }
}

/// Waits for a completion channel to carry a result.
pub(crate) async fn completion(mut receiver: watch::Receiver<Completion>) -> Result<Value, String> {
    match receiver.wait_for(Option::is_some).await {
        Ok(done) => done
            .clone()
            .unwrap_or_else(|| Err("instance produced no result".to_string())),
        Err(_) => Err("instance task ended without a result".to_string()),
    }
}

impl std::fmt::Debug for WorkflowHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowHost")
            .field("operations", &self.inner.operations)
            .field("workflows", &self.inner.workflows)
            .field("retry", &self.inner.retry)
            .finish()
    }
}
