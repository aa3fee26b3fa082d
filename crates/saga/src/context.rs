//! The orchestration API handed to workflow code.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::InstanceId;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use crate::chain;
use crate::dispatch::{Dispatcher, Invocation};
use crate::error::SagaError;
use crate::events::WorkflowEvent;
use crate::executor::{SagaExecutor, SagaOutcome};
use crate::fan_out::{OrderedJoinResult, join_ordered};
use crate::host::{WorkflowHost, completion};
use crate::race::{RaceOutcome, race};
use crate::services::DurableTimer;
use crate::step::SagaDefinition;

/// Handle a workflow uses to talk to its host.
///
/// Workflow code must read time, randomness and IDs only through this
/// context so that its decisions depend on nothing but its input and the
/// results it receives.
#[derive(Clone)]
pub struct WorkflowContext {
    host: WorkflowHost,
    instance_id: InstanceId,
    workflow: Arc<str>,
    input: Arc<Value>,
    parent: Option<InstanceId>,
    uuid_sequence: Arc<AtomicU64>,
    child_sequence: Arc<AtomicU64>,
}

impl WorkflowContext {
    pub(crate) fn new(
        host: WorkflowHost,
        instance_id: InstanceId,
        workflow: &str,
        input: Value,
        parent: Option<InstanceId>,
    ) -> Self {
        Self {
            host,
            instance_id,
            workflow: Arc::from(workflow),
            input: Arc::new(input),
            parent,
            uuid_sequence: Arc::new(AtomicU64::new(0)),
            child_sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns this instance's ID.
    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// Returns the workflow name this instance runs.
    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    /// Returns the parent instance, for sub-workflows.
    pub fn parent(&self) -> Option<&InstanceId> {
        self.parent.as_ref()
    }

    /// Returns the raw instance input.
    pub fn raw_input(&self) -> &Value {
        &self.input
    }

    /// Decodes the instance input.
    pub fn input<T: DeserializeOwned>(&self) -> Result<T, SagaError> {
        Ok(T::deserialize(self.input.as_ref())?)
    }

    /// Returns the host's notion of now.
    pub fn current_time(&self) -> DateTime<Utc> {
        self.host.clock().now()
    }

    /// Returns a UUID derived from the instance ID and a per-instance counter.
    ///
    /// The n-th call in an instance always yields the same value.
    pub fn new_uuid(&self) -> Uuid {
        let n = self.uuid_sequence.fetch_add(1, Ordering::SeqCst);
        let name = format!("{}/{}", self.instance_id, n);
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
    }

    /// Calls a registered operation.
    pub async fn call_operation<I, O>(&self, name: &str, input: I) -> Result<O, SagaError>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        let output = self
            .host
            .call_operation(name, serde_json::to_value(input)?)
            .await?;
        Ok(serde_json::from_value(output)?)
    }

    /// Runs a registered workflow as a child instance and waits for its output.
    ///
    /// The child ID is `"{parent}:{name}-{n}"`, `n` counting child starts in
    /// this instance from 1.
    pub async fn call_sub_workflow<I, O>(&self, name: &str, input: I) -> Result<O, SagaError>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        let child_id = self.next_child_id(name);
        self.call_sub_workflow_with_id(name, child_id, input).await
    }

    /// Runs a registered workflow as a child instance with an explicit ID.
    pub async fn call_sub_workflow_with_id<I, O>(
        &self,
        name: &str,
        child_id: InstanceId,
        input: I,
    ) -> Result<O, SagaError>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        let output = self
            .start_child(name, child_id, serde_json::to_value(input)?)
            .await?
            .await?;
        Ok(serde_json::from_value(output)?)
    }

    /// Waits for a named signal with no deadline.
    pub async fn wait_for_event<T: DeserializeOwned>(&self, event: &str) -> Result<T, SagaError> {
        let payload = self
            .host
            .signals()
            .subscribe(&self.instance_id, event)
            .await?;
        self.record(WorkflowEvent::event_received(event, payload.clone()))
            .await;
        Ok(serde_json::from_value(payload)?)
    }

    /// Creates a durable timer owned by this instance.
    ///
    /// The timer must be awaited or canceled before the workflow returns.
    pub async fn create_timer(&self, fire_at: DateTime<Utc>) -> DurableTimer {
        let timer = self.host.timers().create_timer(&self.instance_id, fire_at);
        self.record(WorkflowEvent::timer_created(timer.id(), fire_at))
            .await;
        timer
    }

    /// Waits for a named signal or the deadline, whichever comes first.
    ///
    /// The wait is registered before the timer, so a signal raised before
    /// this call is consumed immediately. The timer never outlives the race.
    #[tracing::instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn wait_for_event_or_timeout<T: DeserializeOwned>(
        &self,
        event: &str,
        deadline: DateTime<Utc>,
    ) -> Result<RaceOutcome<T>, SagaError> {
        let subscription = self.host.signals().subscribe(&self.instance_id, event);
        let timer = self.create_timer(deadline).await;
        let timer_id = timer.id();

        let outcome = race(subscription, timer).await?;
        match &outcome {
            RaceOutcome::Signaled(payload) => {
                self.record(WorkflowEvent::timer_canceled(timer_id, deadline))
                    .await;
                self.record(WorkflowEvent::event_received(event, payload.clone()))
                    .await;
            }
            RaceOutcome::TimedOut => {
                self.record(WorkflowEvent::timer_fired(timer_id, deadline))
                    .await;
            }
        }

        match outcome {
            RaceOutcome::Signaled(payload) => {
                Ok(RaceOutcome::Signaled(serde_json::from_value(payload)?))
            }
            RaceOutcome::TimedOut => Ok(RaceOutcome::TimedOut),
        }
    }

    /// Runs a saga with this instance as the dispatcher.
    pub async fn run_saga(
        &self,
        saga: &SagaDefinition,
        input: impl Serialize,
    ) -> Result<SagaOutcome, SagaError> {
        let input = serde_json::to_value(input)?;
        let executor = SagaExecutor::new(Arc::new(self.clone()));
        Ok(executor.run(saga, input).await)
    }

    /// Runs links as a sequential chain.
    pub async fn run_chain(
        &self,
        links: &[Invocation],
        input: impl Serialize,
    ) -> Result<Value, SagaError> {
        chain::run_chain(self, links, serde_json::to_value(input)?).await
    }

    /// Starts one child instance per branch and waits for all of them.
    ///
    /// Children are started in branch order, so their IDs are stable; they
    /// then run concurrently. Each element of the result is that branch's
    /// output or error.
    pub async fn call_sub_workflows_parallel<I, O>(
        &self,
        branches: Vec<(&str, I)>,
    ) -> Result<OrderedJoinResult<Result<O, SagaError>>, SagaError>
    where
        I: Serialize,
        O: DeserializeOwned + Send + 'static,
    {
        let mut pending = Vec::with_capacity(branches.len());
        for (name, input) in branches {
            let child_id = self.next_child_id(name);
            pending.push(self.start_child(name, child_id, serde_json::to_value(input)?).await);
        }

        let futures: Vec<_> = pending
            .into_iter()
            .map(|started| async move {
                let output = started?.await?;
                Ok::<O, SagaError>(serde_json::from_value(output)?)
            })
            .collect();

        join_ordered(futures).await
    }

    /// Runs several sagas concurrently in this instance.
    ///
    /// Each branch has its own compensation stack; one branch rolling back
    /// does not touch the others.
    pub async fn run_sagas_parallel(
        &self,
        branches: Vec<(SagaDefinition, Value)>,
    ) -> Result<OrderedJoinResult<SagaOutcome>, SagaError> {
        let futures: Vec<_> = branches
            .into_iter()
            .map(|(saga, input)| {
                let executor = SagaExecutor::new(Arc::new(self.clone()));
                async move { executor.run(&saga, input).await }
            })
            .collect();

        join_ordered(futures).await
    }

    fn next_child_id(&self, name: &str) -> InstanceId {
        let n = self.child_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        InstanceId::child(&self.instance_id, &format!("{}-{}", name.to_lowercase(), n))
    }

    /// Starts a child and returns a future resolving to its output.
    async fn start_child(
        &self,
        name: &str,
        child_id: InstanceId,
        input: Value,
    ) -> Result<ChildCompletion, SagaError> {
        self.record(WorkflowEvent::sub_workflow_started(name, child_id.clone()))
            .await;
        let receiver = self
            .host
            .launch(name, child_id.clone(), input, Some(self.instance_id.clone()))
            .await?;
        Ok(ChildCompletion {
            workflow: name.to_string(),
            instance_id: child_id,
            receiver,
        })
    }

    async fn record(&self, event: WorkflowEvent) {
        self.host.record(&self.instance_id, event).await;
    }
}

/// A started child instance.
struct ChildCompletion {
    workflow: String,
    instance_id: InstanceId,
    receiver: tokio::sync::watch::Receiver<Option<Result<Value, String>>>,
}

impl std::future::IntoFuture for ChildCompletion {
    type Output = Result<Value, SagaError>;
    type IntoFuture = futures_util::future::BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        use futures_util::FutureExt;

        async move {
            completion(self.receiver)
                .await
                .map_err(|reason| SagaError::SubWorkflowFailed {
                    workflow: self.workflow,
                    instance_id: self.instance_id,
                    reason,
                })
        }
        .boxed()
    }
}

#[async_trait]
impl Dispatcher for WorkflowContext {
    async fn call_operation(&self, name: &str, input: Value) -> Result<Value, SagaError> {
        self.host.call_operation(name, input).await
    }

    async fn call_sub_workflow(&self, name: &str, input: Value) -> Result<Value, SagaError> {
        WorkflowContext::call_sub_workflow(self, name, input).await
    }

    async fn record(&self, event: WorkflowEvent) {
        WorkflowContext::record(self, event).await;
    }
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("instance_id", &self.instance_id)
            .field("workflow", &self.workflow)
            .field("parent", &self.parent)
            .finish()
    }
}
