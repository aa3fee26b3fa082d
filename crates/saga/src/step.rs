//! Saga steps and the step executor.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::compensation::CompensationStack;
use crate::dispatch::{Dispatcher, Invocation};
use crate::error::SagaError;

/// The result of a step's forward operation.
///
/// Domain failures are `succeeded: false` values, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult<T> {
    /// Whether the step did what it was asked to.
    pub succeeded: bool,
    /// The step's output, if any.
    #[serde(default)]
    pub payload: Option<T>,
}

impl<T> StepResult<T> {
    /// A successful result carrying `payload`.
    pub fn succeeded(payload: T) -> Self {
        Self {
            succeeded: true,
            payload: Some(payload),
        }
    }

    /// A domain failure.
    pub fn failed() -> Self {
        Self {
            succeeded: false,
            payload: None,
        }
    }

    /// Returns the payload of a successful result.
    pub fn into_payload(self) -> Option<T> {
        if self.succeeded { self.payload } else { None }
    }
}

/// What a step can see when building its forward input.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    input: &'a Value,
    current: &'a Value,
    payloads: &'a HashMap<String, Value>,
}

impl<'a> StepContext<'a> {
    pub(crate) fn new(
        input: &'a Value,
        current: &'a Value,
        payloads: &'a HashMap<String, Value>,
    ) -> Self {
        Self {
            input,
            current,
            payloads,
        }
    }

    /// The saga's initial input.
    pub fn input(&self) -> &Value {
        self.input
    }

    /// The previous step's payload, or the saga input for the first step.
    pub fn current(&self) -> &Value {
        self.current
    }

    /// The payload reported by an earlier step.
    pub fn payload(&self, step: &str) -> Option<&Value> {
        self.payloads.get(step)
    }

    /// Decodes the saga input.
    pub fn input_as<T: DeserializeOwned>(&self) -> Result<T, SagaError> {
        Ok(T::deserialize(self.input)?)
    }

    /// Decodes the current value.
    pub fn current_as<T: DeserializeOwned>(&self) -> Result<T, SagaError> {
        Ok(T::deserialize(self.current)?)
    }

    /// Decodes an earlier step's payload. A missing payload decodes from `null`.
    pub fn payload_as<T: DeserializeOwned>(&self, step: &str) -> Result<T, SagaError> {
        Ok(T::deserialize(self.payload(step).unwrap_or(&Value::Null))?)
    }
}

type InputMapper = Arc<dyn Fn(&StepContext<'_>) -> Result<Value, SagaError> + Send + Sync>;
type CompensationInput = Arc<dyn Fn(&Value, &Value) -> Result<Value, SagaError> + Send + Sync>;

#[derive(Clone)]
struct CompensationPlan {
    operation: String,
    input: CompensationInput,
}

/// One forward operation with an optional compensation.
#[derive(Clone)]
pub struct Step {
    name: String,
    forward: Invocation,
    input: Option<InputMapper>,
    compensation: Option<CompensationPlan>,
}

impl Step {
    /// A step whose forward call is a registered operation.
    pub fn operation(name: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::new(name, Invocation::operation(operation))
    }

    /// A step whose forward call runs a registered workflow as a child instance.
    pub fn sub_workflow(name: impl Into<String>, workflow: impl Into<String>) -> Self {
        Self::new(name, Invocation::sub_workflow(workflow))
    }

    /// A step with an explicit invocation.
    pub fn new(name: impl Into<String>, forward: Invocation) -> Self {
        Self {
            name: name.into(),
            forward,
            input: None,
            compensation: None,
        }
    }

    /// Builds the forward input from the saga state instead of passing the current value.
    pub fn with_input<T, F>(mut self, build: F) -> Self
    where
        T: Serialize,
        F: Fn(&StepContext<'_>) -> Result<T, SagaError> + Send + Sync + 'static,
    {
        self.input = Some(Arc::new(
            move |ctx: &StepContext<'_>| -> Result<Value, SagaError> {
                Ok(serde_json::to_value(build(ctx)?)?)
            },
        ));
        self
    }

    /// Declares a compensation whose input is derived from the forward input and payload.
    pub fn compensate_with<I, P, T, F>(mut self, operation: impl Into<String>, build: F) -> Self
    where
        I: DeserializeOwned,
        P: DeserializeOwned,
        T: Serialize,
        F: Fn(I, P) -> T + Send + Sync + 'static,
    {
        self.compensation = Some(CompensationPlan {
            operation: operation.into(),
            input: Arc::new(move |input: &Value, payload: &Value| -> Result<Value, SagaError> {
                let input = I::deserialize(input)?;
                let payload = P::deserialize(payload)?;
                Ok(serde_json::to_value(build(input, payload))?)
            }),
        });
        self
    }

    /// Declares a compensation that receives the forward input unchanged.
    pub fn compensate_with_input(mut self, operation: impl Into<String>) -> Self {
        self.compensation = Some(CompensationPlan {
            operation: operation.into(),
            input: Arc::new(|input: &Value, _: &Value| -> Result<Value, SagaError> {
                Ok(input.clone())
            }),
        });
        self
    }

    /// Returns the step name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns how the forward call is dispatched.
    pub fn forward(&self) -> &Invocation {
        &self.forward
    }

    /// Returns the compensation operation, if one is declared.
    pub fn compensation_operation(&self) -> Option<&str> {
        self.compensation.as_ref().map(|c| c.operation.as_str())
    }

    fn forward_input(&self, ctx: &StepContext<'_>) -> Result<Value, SagaError> {
        match &self.input {
            Some(build) => build(ctx),
            None => Ok(ctx.current().clone()),
        }
    }

    /// Runs the forward call and, on success, pushes the compensation.
    ///
    /// The compensation's input is computed here, from this execution's
    /// input and payload, so later steps cannot change what gets undone.
    /// If that input cannot be built, the compensation is still pushed and
    /// fails when the stack drains.
    pub async fn execute(
        &self,
        dispatcher: &Arc<dyn Dispatcher>,
        ctx: &StepContext<'_>,
        stack: &mut CompensationStack,
    ) -> Result<Option<Value>, StepFailure> {
        let input = self.forward_input(ctx).map_err(StepFailure::Errored)?;

        let output = self
            .forward
            .invoke(dispatcher.as_ref(), input.clone())
            .await
            .map_err(StepFailure::Errored)?;
        let result: StepResult<Value> =
            serde_json::from_value(output).map_err(|e| StepFailure::Errored(e.into()))?;

        if !result.succeeded {
            return Err(StepFailure::Declined);
        }

        if let Some(plan) = &self.compensation {
            let payload = result.payload.clone().unwrap_or(Value::Null);
            let compensation_input = (plan.input)(&input, &payload);
            if let Err(e) = &compensation_input {
                tracing::warn!(
                    step = %self.name,
                    operation = %plan.operation,
                    error = %e,
                    "Compensation input could not be built"
                );
            }
            let dispatcher = Arc::clone(dispatcher);
            let operation = plan.operation.clone();
            stack.push(
                self.name.clone(),
                Box::new(move || {
                    async move {
                        let compensation_input = compensation_input?;
                        dispatcher
                            .call_operation(&operation, compensation_input)
                            .await
                            .map(|_| ())
                    }
                    .boxed()
                }),
            );
        }

        Ok(result.payload)
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("forward", &self.forward)
            .field("compensation", &self.compensation_operation())
            .finish()
    }
}

/// Why a step stopped the saga.
#[derive(Debug)]
pub enum StepFailure {
    /// The operation completed but reported `succeeded: false`.
    Declined,
    /// The operation could not be completed.
    Errored(SagaError),
}

impl std::fmt::Display for StepFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepFailure::Declined => write!(f, "step reported failure"),
            StepFailure::Errored(e) => write!(f, "{e}"),
        }
    }
}

/// A named, ordered sequence of steps.
#[derive(Debug, Clone)]
pub struct SagaDefinition {
    name: String,
    steps: Vec<Step>,
}

impl SagaDefinition {
    /// Creates a saga with no steps.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Appends a step.
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Returns the saga name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the steps in declared order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_result_serialization() {
        let ok = StepResult::succeeded(json!({"price": 1000}));
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value, json!({"succeeded": true, "payload": {"price": 1000}}));

        let failed: StepResult<Value> = serde_json::from_value(json!({"succeeded": false})).unwrap();
        assert_eq!(failed, StepResult::failed());
        assert_eq!(failed.into_payload(), None);
    }

    #[test]
    fn test_step_context_accessors() {
        let input = json!({"seats": [5, 7]});
        let current = json!({"price": 1000});
        let mut payloads = HashMap::new();
        payloads.insert("book_seats".to_string(), current.clone());
        let ctx = StepContext::new(&input, &current, &payloads);

        let seats: Vec<u32> = serde_json::from_value(ctx.input()["seats"].clone()).unwrap();
        assert_eq!(seats, vec![5, 7]);
        assert_eq!(ctx.payload("book_seats"), Some(&current));
        assert!(ctx.payload("pay").is_none());
        let missing: Option<u32> = ctx.payload_as("pay").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_default_forward_input_is_current_value() {
        let step = Step::operation("link", "Link1");
        let input = json!("111");
        let current = json!(111);
        let payloads = HashMap::new();
        let ctx = StepContext::new(&input, &current, &payloads);

        assert_eq!(step.forward_input(&ctx).unwrap(), json!(111));
    }

    #[test]
    fn test_custom_forward_input() {
        let step = Step::operation("register", "RegisterAndNotify")
            .with_input(|ctx| Ok(json!({ "seats": ctx.input()["seats"], "note": "x" })));
        let input = json!({"seats": [1]});
        let payloads = HashMap::new();
        let ctx = StepContext::new(&input, &Value::Null, &payloads);

        assert_eq!(
            step.forward_input(&ctx).unwrap(),
            json!({"seats": [1], "note": "x"})
        );
    }

    #[test]
    fn test_saga_definition_keeps_declared_order() {
        let saga = SagaDefinition::new("booking")
            .step(Step::operation("book_seats", "BookSeats").compensate_with_input("ReleaseSeats"))
            .step(Step::sub_workflow("pay", "Pay"))
            .step(Step::operation("register", "RegisterAndNotify"));

        let names: Vec<_> = saga.steps().iter().map(Step::name).collect();
        assert_eq!(names, vec!["book_seats", "pay", "register"]);
        assert_eq!(
            saga.steps()[0].compensation_operation(),
            Some("ReleaseSeats")
        );
        assert_eq!(saga.steps()[1].forward(), &Invocation::sub_workflow("Pay"));
        assert!(saga.steps()[2].compensation_operation().is_none());
    }
}
