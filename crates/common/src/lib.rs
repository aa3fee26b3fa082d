//! Shared types used across the workflow crates.

mod types;

pub use types::InstanceId;
