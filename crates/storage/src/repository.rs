//! Persistence contract for metrics and nodes.
//!
//! The runtime only ever talks to storage through [`Repository`]; any durable
//! row or key-value store can sit behind it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use aevrt_core::{MetricRecord, MetricType, Node, TaskType};

use crate::error::StorageError;

#[async_trait]
pub trait Repository: Send + Sync {
    /// Append one metric sample. Never overwrites.
    async fn insert_metric(&self, record: &MetricRecord) -> Result<(), StorageError>;

    /// Samples at or after `since`, newest first, at most `limit`.
    /// `metric_type` narrows the result to one kind of sample.
    async fn recent_metrics(
        &self,
        since: DateTime<Utc>,
        metric_type: Option<MetricType>,
        limit: usize,
    ) -> Result<Vec<MetricRecord>, StorageError>;

    /// Delete every sample older than `older_than`. Returns the number removed.
    async fn prune_metrics(&self, older_than: DateTime<Utc>) -> Result<usize, StorageError>;

    /// Insert or replace a node keyed by `node_id`.
    async fn upsert_node(&self, node: &Node) -> Result<(), StorageError>;

    /// Active nodes, optionally filtered by capability.
    async fn list_active_nodes(
        &self,
        capability: Option<TaskType>,
    ) -> Result<Vec<Node>, StorageError>;

    /// Every stored node regardless of status (used to warm the registry).
    async fn list_nodes(&self) -> Result<Vec<Node>, StorageError>;
}
