//! Sequential chain: each link's output is the next link's input.

use serde_json::Value;

use crate::dispatch::{Dispatcher, Invocation};
use crate::error::SagaError;

/// Runs `links` one after another, threading each output into the next call.
///
/// Returns the last link's output, or `input` unchanged for an empty chain.
/// The first failing link stops the chain; nothing is compensated.
pub async fn run_chain(
    dispatcher: &dyn Dispatcher,
    links: &[Invocation],
    input: Value,
) -> Result<Value, SagaError> {
    let mut current = input;
    for (position, link) in links.iter().enumerate() {
        tracing::debug!(position, link = %link, "chain link started");
        current = link.invoke(dispatcher, current).await.inspect_err(|e| {
            tracing::warn!(position, link = %link, error = %e, "chain stopped");
        })?;
    }
    Ok(current)
}
