//! The `CallChain` workflow: three slow links run back to back.

use std::time::Duration;

use saga::{Invocation, OperationRegistry, SagaError, WorkflowContext, WorkflowRegistry};
use serde::Deserialize;

use crate::DemoServices;
use crate::error::BookingError;

pub const CALL_CHAIN: &str = "CallChain";
pub const LINK1: &str = "Link1";
pub const LINK2: &str = "Link2";
pub const LINK3: &str = "Link3";

/// Input of `Link1`: a number, or a string holding one.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LinkInput {
    Number(i64),
    Text(String),
}

impl LinkInput {
    fn parse(self) -> Result<i64, BookingError> {
        match self {
            LinkInput::Number(n) => Ok(n),
            LinkInput::Text(raw) => raw
                .trim()
                .parse()
                .map_err(|_| BookingError::InvalidChainInput(raw)),
        }
    }
}

/// Runs `Link1 -> Link2 -> Link3` over the workflow input.
pub async fn call_chain_workflow(ctx: WorkflowContext) -> Result<String, SagaError> {
    tracing::warn!(input = %ctx.raw_input(), "in chain");
    let links = [
        Invocation::operation(LINK1),
        Invocation::operation(LINK2),
        Invocation::operation(LINK3),
    ];
    let output = ctx.run_chain(&links, ctx.raw_input()).await?;
    Ok(serde_json::from_value(output)?)
}

pub(crate) fn register_operations(operations: &mut OperationRegistry, services: &DemoServices) {
    let delay = services.link_delay;

    operations.register(LINK1, move |input: LinkInput| async move {
        tracing::info!(?input, "in Link1");
        tokio::time::sleep(delay).await;
        input.parse().map_err(|e| e.into_operation_error(LINK1))
    });

    operations.register(LINK2, move |to_format: i64| async move {
        tracing::info!(to_format, "in Link2");
        tokio::time::sleep(delay).await;
        Ok(format!("Formatted data {to_format}"))
    });

    operations.register(LINK3, move |to_wrap: String| async move {
        tracing::info!(%to_wrap, "in Link3");
        tokio::time::sleep(delay).await;
        Ok(format!("Wrapped data [{to_wrap}]"))
    });
}

pub(crate) fn register_workflows(workflows: &mut WorkflowRegistry) {
    workflows.register(CALL_CHAIN, call_chain_workflow);
}

/// Default per-link delay.
pub fn default_link_delay() -> Duration {
    Duration::from_secs(10)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn parse(value: Value) -> Result<i64, BookingError> {
        serde_json::from_value::<LinkInput>(value).unwrap().parse()
    }

    #[test]
    fn test_link_input_accepts_numbers_and_strings() {
        assert_eq!(parse(serde_json::json!(111)).unwrap(), 111);
        assert_eq!(parse(serde_json::json!("222")).unwrap(), 222);
        assert_eq!(parse(serde_json::json!(" 7 ")).unwrap(), 7);
    }

    #[test]
    fn test_link_input_rejects_text() {
        let err = parse(serde_json::json!("abc")).unwrap_err();
        assert!(matches!(err, BookingError::InvalidChainInput(raw) if raw == "abc"));
    }
}
