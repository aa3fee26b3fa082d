//! Append-only instance history and its in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::InstanceId;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::SagaError;
use crate::events::WorkflowEvent;

/// A single history entry for one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Position in the instance's history, starting at 1.
    pub sequence: u64,
    /// The owning instance.
    pub instance_id: InstanceId,
    /// The event type name, for filtering without matching on `event`.
    pub event_type: String,
    /// When the host recorded the event.
    pub recorded_at: DateTime<Utc>,
    /// The event itself.
    pub event: WorkflowEvent,
}

impl HistoryRecord {
    /// Creates a history record.
    pub fn new(
        sequence: u64,
        instance_id: InstanceId,
        event: WorkflowEvent,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sequence,
            instance_id,
            event_type: event.event_type().to_string(),
            recorded_at,
            event,
        }
    }
}

/// Storage for instance histories.
///
/// Implementations must keep each instance's records in append order.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Appends an event to an instance's history and returns its sequence number.
    async fn append(&self, instance_id: &InstanceId, event: WorkflowEvent)
    -> Result<u64, SagaError>;

    /// Returns an instance's history, oldest first. Unknown instances have an empty history.
    async fn history(&self, instance_id: &InstanceId) -> Result<Vec<HistoryRecord>, SagaError>;

    /// Returns the IDs of every instance with at least one record.
    async fn instances(&self) -> Result<Vec<InstanceId>, SagaError>;
}

/// In-memory history store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHistoryStore {
    records: Arc<RwLock<HashMap<InstanceId, Vec<HistoryRecord>>>>,
}

impl InMemoryHistoryStore {
    /// Creates a new empty history store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of records across all instances.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.values().map(Vec::len).sum()
    }

    /// Returns the event type names recorded for an instance, in order.
    pub async fn event_types(&self, instance_id: &InstanceId) -> Vec<String> {
        self.records
            .read()
            .await
            .get(instance_id)
            .map(|records| records.iter().map(|r| r.event_type.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(
        &self,
        instance_id: &InstanceId,
        event: WorkflowEvent,
    ) -> Result<u64, SagaError> {
        let mut store = self.records.write().await;
        let records = store.entry(instance_id.clone()).or_default();
        let sequence = records.len() as u64 + 1;
        records.push(HistoryRecord::new(
            sequence,
            instance_id.clone(),
            event,
            Utc::now(),
        ));
        Ok(sequence)
    }

    async fn history(&self, instance_id: &InstanceId) -> Result<Vec<HistoryRecord>, SagaError> {
        Ok(self
            .records
            .read()
            .await
            .get(instance_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn instances(&self) -> Result<Vec<InstanceId>, SagaError> {
        let mut ids: Vec<_> = self.records.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
