//! Name-to-handler tables for operations and workflows.
//!
//! Handlers are stored type-erased: inputs and outputs cross the registry
//! as JSON values and are decoded at the edges.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::context::WorkflowContext;
use crate::error::SagaError;

type OperationHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, SagaError>> + Send + Sync>;

/// Type-erased workflow entry point.
pub type WorkflowHandler =
    Arc<dyn Fn(WorkflowContext) -> BoxFuture<'static, Result<Value, SagaError>> + Send + Sync>;

/// Registered operations (activities), keyed by name.
#[derive(Clone, Default)]
pub struct OperationRegistry {
    handlers: HashMap<String, OperationHandler>,
}

impl OperationRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an operation. A later registration under the same name replaces the earlier one.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut operations = OperationRegistry::new();
    /// operations.register("Link1", |raw: String| async move {
    ///     raw.parse::<i64>().map_err(|e| SagaError::operation_failed("Link1", e))
    /// });
    /// ```
    pub fn register<I, O, F, Fut>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, SagaError>> + Send + 'static,
    {
        let name = name.into();
        let handler = Arc::new(handler);
        let erased: OperationHandler = Arc::new(move |raw: Value| {
            let handler = Arc::clone(&handler);
            async move {
                let input: I = serde_json::from_value(raw)?;
                let output = handler(input).await?;
                Ok(serde_json::to_value(output)?)
            }
            .boxed()
        });

        if self.handlers.insert(name.clone(), erased).is_some() {
            tracing::warn!(operation = %name, "operation re-registered, replacing previous handler");
        }
        self
    }

    /// Returns true if an operation is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Returns the registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Calls an operation by name.
    ///
    /// Handler errors come back as [`SagaError::OperationFailed`]; an input
    /// or output that does not match the handler's types is a
    /// [`SagaError::Serialization`] error.
    pub async fn call(&self, name: &str, input: Value) -> Result<Value, SagaError> {
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| SagaError::OperationNotFound(name.to_string()))?;

        match handler(input).await {
            Ok(output) => Ok(output),
            Err(e @ (SagaError::OperationFailed { .. } | SagaError::Serialization(_))) => Err(e),
            Err(e) => Err(SagaError::operation_failed(name, e)),
        }
    }
}

/// Registered workflows (orchestrations), keyed by name.
#[derive(Clone, Default)]
pub struct WorkflowRegistry {
    handlers: HashMap<String, WorkflowHandler>,
}

impl WorkflowRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a workflow. A later registration under the same name replaces the earlier one.
    pub fn register<O, F, Fut>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        O: Serialize + 'static,
        F: Fn(WorkflowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, SagaError>> + Send + 'static,
    {
        let name = name.into();
        let handler = Arc::new(handler);
        let erased: WorkflowHandler = Arc::new(move |ctx: WorkflowContext| {
            let handler = Arc::clone(&handler);
            async move {
                let output = handler(ctx).await?;
                Ok(serde_json::to_value(output)?)
            }
            .boxed()
        });

        if self.handlers.insert(name.clone(), erased).is_some() {
            tracing::warn!(workflow = %name, "workflow re-registered, replacing previous handler");
        }
        self
    }

    /// Returns the handler registered under `name`.
    pub fn get(&self, name: &str) -> Option<WorkflowHandler> {
        self.handlers.get(name).cloned()
    }

    /// Returns true if a workflow is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Returns the registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("operations", &self.names())
            .finish()
    }
}

impl std::fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRegistry")
            .field("workflows", &self.names())
            .finish()
    }
}
