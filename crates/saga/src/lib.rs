//! Saga orchestration primitives and an in-process workflow host.
//!
//! This crate provides four coordination patterns for long-running
//! workflows:
//!
//! 1. **Saga with compensation**: steps run in order; on the first failure
//!    the compensations of every completed step run newest first.
//! 2. **Event-or-timeout**: wait for a named external signal or a durable
//!    deadline, whichever comes first.
//! 3. **Fan-out/fan-in**: run independent branches concurrently and collect
//!    their outcomes in branch order.
//! 4. **Sequential chain**: pipe each operation's output into the next.
//!
//! Workflows run inside a [`WorkflowHost`], which resolves operations and
//! sub-workflows by name and records every instance's history.

pub mod aggregate;
pub mod chain;
pub mod compensation;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod executor;
pub mod fan_out;
pub mod host;
pub mod race;
pub mod registry;
pub mod services;
pub mod state;
pub mod step;

pub use aggregate::InstanceRecord;
pub use chain::run_chain;
pub use compensation::{CompensationFailure, CompensationReport, CompensationStack};
pub use context::WorkflowContext;
pub use dispatch::{Dispatcher, Invocation};
pub use error::{Result, SagaError};
pub use events::WorkflowEvent;
pub use executor::{SagaExecutor, SagaOutcome, SagaRun};
pub use fan_out::{OrderedJoinResult, join_ordered};
pub use host::{InstanceStatus, RetryPolicy, WorkflowHost, WorkflowHostBuilder};
pub use race::{RaceOutcome, race};
pub use registry::{OperationRegistry, WorkflowRegistry};
pub use services::{
    Clock, Delivery, DurableTimer, FixedClock, HistoryRecord, HistoryStore, InMemoryHistoryStore,
    InMemorySignalBus, InMemoryTimerService, SignalBus, SystemClock, TimerService,
};
pub use state::InstanceState;
pub use step::{SagaDefinition, Step, StepContext, StepResult};
