//! The `Pay` sub-workflow: wait for a payment confirmation or give up.

use chrono::Duration;
use saga::{RaceOutcome, SagaError, StepResult, WorkflowContext, WorkflowRegistry};

use crate::money::Money;
use crate::payloads::PaymentReceipt;

pub const PAY: &str = "Pay";

/// Signal carrying the payment decision.
pub const PAY_EVENT: &str = "payEvent";

/// How long a payment may stay unconfirmed.
pub fn payment_timeout() -> Duration {
    Duration::minutes(3)
}

/// Waits for `payEvent`. `true` before the deadline pays; `false` or a
/// timeout declines.
pub async fn pay_workflow(ctx: WorkflowContext) -> Result<StepResult<PaymentReceipt>, SagaError> {
    let price: Money = ctx.input()?;
    tracing::warn!(%price, event = PAY_EVENT, instance_id = %ctx.instance_id(), "paying seats, raise event to confirm");

    let deadline = ctx.current_time() + payment_timeout();
    let approved = match ctx.wait_for_event_or_timeout::<bool>(PAY_EVENT, deadline).await? {
        RaceOutcome::Signaled(approved) => approved,
        RaceOutcome::TimedOut => {
            tracing::error!("payment timed out");
            false
        }
    };

    if approved {
        Ok(StepResult::succeeded(PaymentReceipt {
            transaction_id: ctx.new_uuid(),
        }))
    } else {
        Ok(StepResult::failed())
    }
}

pub(crate) fn register_workflows(workflows: &mut WorkflowRegistry) {
    workflows.register(PAY, pay_workflow);
}
