//! In-memory [`Repository`] used by tests, the worker binary and any host that
//! does not need durability.
//!
//! Metrics live in an append-only `Vec` behind a `RwLock`; pruning is a single
//! `retain` pass under the write lock. Nodes live in a `DashMap` so writes to
//! different nodes do not contend.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use aevrt_core::{MetricRecord, MetricType, Node, NodeStatus, TaskType};

use crate::error::StorageError;
use crate::repository::Repository;

#[derive(Debug, Default)]
pub struct InMemoryRepository {
    metrics: RwLock<Vec<MetricRecord>>,
    nodes: DashMap<String, Node>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored samples.
    pub fn metric_count(&self) -> usize {
        self.metrics.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn metric_count_of(&self, metric_type: MetricType) -> usize {
        self.metrics
            .read()
            .map(|m| m.iter().filter(|r| r.metric_type == metric_type).count())
            .unwrap_or(0)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn insert_metric(&self, record: &MetricRecord) -> Result<(), StorageError> {
        let mut metrics = self
            .metrics
            .write()
            .map_err(|e| StorageError::LockPoisoned(format!("metrics write lock: {}", e)))?;
        metrics.push(record.clone());
        Ok(())
    }

    async fn recent_metrics(
        &self,
        since: DateTime<Utc>,
        metric_type: Option<MetricType>,
        limit: usize,
    ) -> Result<Vec<MetricRecord>, StorageError> {
        let metrics = self
            .metrics
            .read()
            .map_err(|e| StorageError::LockPoisoned(format!("metrics read lock: {}", e)))?;
        let mut recent: Vec<MetricRecord> = metrics
            .iter()
            .filter(|r| r.timestamp >= since)
            .filter(|r| metric_type.map_or(true, |t| r.metric_type == t))
            .cloned()
            .collect();
        recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        recent.truncate(limit);
        Ok(recent)
    }

    async fn prune_metrics(&self, older_than: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut metrics = self
            .metrics
            .write()
            .map_err(|e| StorageError::LockPoisoned(format!("metrics write lock: {}", e)))?;
        let before = metrics.len();
        metrics.retain(|r| r.timestamp >= older_than);
        let removed = before - metrics.len();
        debug!(removed, remaining = metrics.len(), "pruned metrics");
        Ok(removed)
    }

    async fn upsert_node(&self, node: &Node) -> Result<(), StorageError> {
        self.nodes.insert(node.node_id.clone(), node.clone());
        Ok(())
    }

    async fn list_active_nodes(
        &self,
        capability: Option<TaskType>,
    ) -> Result<Vec<Node>, StorageError> {
        let mut nodes: Vec<Node> = self
            .nodes
            .iter()
            .filter(|entry| entry.status == NodeStatus::Active)
            .filter(|entry| capability.map_or(true, |c| entry.can_serve(c)))
            .map(|entry| entry.value().clone())
            .collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(nodes)
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, StorageError> {
        let mut nodes: Vec<Node> = self.nodes.iter().map(|e| e.value().clone()).collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(nodes)
    }
}
