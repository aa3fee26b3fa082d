//! Fan-out/fan-in: run independent branches concurrently, collect in order.

use std::future::Future;
use std::ops::Index;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::error::SagaError;

/// Branch outcomes in branch order, regardless of completion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderedJoinResult<T>(Vec<T>);

impl<T> OrderedJoinResult<T> {
    /// Returns the number of branches.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there were no branches.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the outcome of branch `index`.
    pub fn get(&self, index: usize) -> Option<&T> {
        self.0.get(index)
    }

    /// Iterates outcomes in branch order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.0.iter()
    }

    /// Returns the outcomes as a vector.
    pub fn into_inner(self) -> Vec<T> {
        self.0
    }
}

impl<T> Index<usize> for OrderedJoinResult<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.0[index]
    }
}

impl<T> IntoIterator for OrderedJoinResult<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Runs every branch concurrently and waits for all of them.
///
/// The fan-in completes only after the last branch completes; element `i`
/// of the result is branch `i`'s output. Branches that fail return their
/// error as a value, so one branch failing does not cancel the others. A
/// branch that panics is reported as [`SagaError::BranchAborted`].
pub async fn join_ordered<T, F>(branches: Vec<F>) -> Result<OrderedJoinResult<T>, SagaError>
where
    T: Send + 'static,
    F: Future<Output = T> + Send + 'static,
{
    let count = branches.len();
    let mut set = JoinSet::new();
    for (index, branch) in branches.into_iter().enumerate() {
        set.spawn(async move { (index, branch.await) });
    }

    let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(count).collect();
    let mut aborted: Option<String> = None;

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, output)) => {
                tracing::debug!(branch = index, "fan-out branch completed");
                slots[index] = Some(output);
            }
            Err(e) => {
                tracing::error!(error = %e, "fan-out branch did not complete");
                aborted.get_or_insert_with(|| e.to_string());
            }
        }
    }

    let mut outcomes = Vec::with_capacity(count);
    for (index, slot) in slots.into_iter().enumerate() {
        match slot {
            Some(output) => outcomes.push(output),
            None => {
                return Err(SagaError::BranchAborted {
                    index,
                    reason: aborted
                        .clone()
                        .unwrap_or_else(|| "branch produced no outcome".to_string()),
                });
            }
        }
    }

    Ok(OrderedJoinResult(outcomes))
}
