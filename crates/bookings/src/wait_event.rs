//! The `WaitEvent` workflow: guess the number before the deadline.

use chrono::Duration;
use saga::{OperationRegistry, RaceOutcome, SagaError, WorkflowContext, WorkflowRegistry};
use serde_json::Value;

use crate::DemoServices;

pub const WAIT_EVENT: &str = "WaitEvent";
pub const GET_RANDOM: &str = "GetRandom";

/// Signal carrying the guess.
pub const MY_EVENT: &str = "MyEvent";

/// Exclusive upper bound of the number to guess.
pub const RANDOM_BOUND: u32 = 99;

/// Draws a number, then waits up to a minute for `MyEvent`.
///
/// Returns true only if the signal arrives in time and equals the number.
pub async fn wait_event_workflow(ctx: WorkflowContext) -> Result<bool, SagaError> {
    let random: i64 = ctx.call_operation(GET_RANDOM, Value::Null).await?;
    tracing::warn!(random, event = MY_EVENT, "waiting for guess");

    let deadline = ctx.current_time() + Duration::minutes(1);
    match ctx.wait_for_event_or_timeout::<i64>(MY_EVENT, deadline).await? {
        RaceOutcome::Signaled(guess) => Ok(guess == random),
        RaceOutcome::TimedOut => {
            tracing::error!("timeout");
            Ok(false)
        }
    }
}

pub(crate) fn register_operations(operations: &mut OperationRegistry, services: &DemoServices) {
    let random = services.random.clone();
    operations.register(GET_RANDOM, move |_: Value| {
        let random = random.clone();
        async move { Ok(i64::from(random.next_below(RANDOM_BOUND))) }
    });
}

pub(crate) fn register_workflows(workflows: &mut WorkflowRegistry) {
    workflows.register(WAIT_EVENT, wait_event_workflow);
}
