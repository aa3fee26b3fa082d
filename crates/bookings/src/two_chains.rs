//! The `CallTwoChains` workflow: two `CallChain` children in parallel.

use saga::{SagaError, WorkflowContext, WorkflowRegistry};

use crate::chain::CALL_CHAIN;

pub const CALL_TWO_CHAINS: &str = "CallTwoChains";

/// Inputs handed to the two chains.
pub const CHAIN_INPUTS: [&str; 2] = ["111", "222"];

/// Runs both chains concurrently and joins their outputs in input order.
pub async fn call_two_chains_workflow(ctx: WorkflowContext) -> Result<String, SagaError> {
    tracing::warn!("in two chains");
    let branches = CHAIN_INPUTS
        .iter()
        .map(|input| (CALL_CHAIN, *input))
        .collect();

    let results = ctx
        .call_sub_workflows_parallel::<&str, String>(branches)
        .await?;
    let outputs = results
        .into_iter()
        .collect::<Result<Vec<String>, SagaError>>()?;

    Ok(outputs.join("; "))
}

pub(crate) fn register_workflows(workflows: &mut WorkflowRegistry) {
    workflows.register(CALL_TWO_CHAINS, call_two_chains_workflow);
}
