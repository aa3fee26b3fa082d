//! Starts a demo workflow, raises configured signals and polls it to completion.

pub mod config;

use std::time::Duration;

use bookings::{DemoServices, register_all};
use common::InstanceId;
use saga::{InstanceStatus, RetryPolicy, SagaError, WorkflowHost};
use thiserror::Error;

pub use config::{Config, ConfigError, LogFormat, RaiseEvent};

/// How long a signal target may take to appear before raising is abandoned.
const RAISE_ATTEMPTS: u32 = 50;

/// Delay between operation retries when `OPERATION_MAX_ATTEMPTS` > 1.
const RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Workflow error: {0}")]
    Saga(#[from] SagaError),

    #[error("Instance {0} disappeared while polling")]
    Vanished(InstanceId),
}

/// Builds a host with every demo workflow registered.
pub fn build_host(config: &Config, services: DemoServices) -> WorkflowHost {
    let services = services.with_link_delay(config.link_delay);
    let (operations, workflows) = register_all(&services);
    WorkflowHost::builder(operations, workflows)
        .with_retry_policy(RetryPolicy::fixed(config.operation_max_attempts, RETRY_BACKOFF))
        .build()
}

/// Runs the configured workflow and returns its final status.
#[tracing::instrument(skip_all, fields(workflow = %config.workflow))]
pub async fn run(config: &Config, host: &WorkflowHost) -> Result<InstanceStatus, RunnerError> {
    let instance_id = host.start(&config.workflow, &config.input).await?;
    tracing::info!(%instance_id, "started orchestration");

    if !config.raise_events.is_empty() {
        let host = host.clone();
        let root = instance_id.clone();
        let events = config.raise_events.clone();
        let delay = config.raise_delay;
        let poll = config.poll_interval;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            for event in events {
                raise(&host, &root, &event, poll).await;
            }
        });
    }

    loop {
        let status = host
            .status(&instance_id)
            .await?
            .ok_or_else(|| RunnerError::Vanished(instance_id.clone()))?;
        if status.runtime_status.is_terminal() {
            tracing::info!(state = %status.runtime_status, "orchestration finished");
            return Ok(status);
        }
        tracing::info!(state = %status.runtime_status, "orchestration running");
        tokio::time::sleep(config.poll_interval).await;
    }
}

async fn raise(host: &WorkflowHost, root: &InstanceId, event: &RaiseEvent, poll: Duration) {
    let target = match &event.target {
        Some(suffix) => InstanceId::child(root, suffix),
        None => root.clone(),
    };

    for _ in 0..RAISE_ATTEMPTS {
        match host
            .raise_event(&target, &event.event, &event.payload)
            .await
        {
            Ok(delivery) => {
                tracing::info!(%target, event = %event.event, ?delivery, "raised event");
                return;
            }
            Err(SagaError::InstanceNotFound(_)) => tokio::time::sleep(poll).await,
            Err(e) => {
                tracing::error!(%target, event = %event.event, error = %e, "failed to raise event");
                return;
            }
        }
    }
    tracing::warn!(%target, event = %event.event, "target never became available, event dropped");
}
