//! Metrics Store: append-only performance samples with age-based retention.
//!
//! Writes go straight through to the [`Repository`]. A failed write is logged
//! and counted, never surfaced to the request that produced it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, warn};

use aevrt_core::config::MetricsConfig;
use aevrt_core::{AevError, MetricRecord, MetricType, TaskType};
use aevrt_storage::Repository;

pub struct MetricsStore {
    repo: Arc<dyn Repository>,
    config: MetricsConfig,
    written: AtomicU64,
    dropped: AtomicU64,
}

impl MetricsStore {
    pub fn new(repo: Arc<dyn Repository>, config: MetricsConfig) -> Self {
        Self {
            repo,
            config,
            written: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append one sample.
    pub async fn record(&self, record: MetricRecord) {
        match self.repo.insert_metric(&record).await {
            Ok(()) => {
                self.written.fetch_add(1, Ordering::Relaxed);
                debug!(metric = ?record.metric_type, value = record.value, "metric recorded");
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(metric = ?record.metric_type, error = %e, "failed to record metric");
            }
        }
    }

    /// One sample per completed task.
    pub async fn record_task_latency(
        &self,
        task_type: TaskType,
        latency_ms: f64,
        tile_count: usize,
        failed_tiles: usize,
        priority: i32,
    ) {
        let record = MetricRecord::new(MetricType::TaskLatency, latency_ms)
            .with_task_type(task_type)
            .with_metadata(json!({
                "tile_count": tile_count,
                "failed_tiles": failed_tiles,
                "priority": priority,
            }));
        self.record(record).await;
    }

    /// One sample per inbound request, successful or not.
    pub async fn record_request_time(&self, task_type: Option<TaskType>, elapsed_ms: f64, outcome: &str) {
        let mut record = MetricRecord::new(MetricType::RequestTime, elapsed_ms)
            .with_metadata(json!({ "outcome": outcome }));
        record.task_type = task_type;
        self.record(record).await;
    }

    pub async fn record_tile_latency(&self, task_type: TaskType, node_id: Option<&str>, latency_ms: f64) {
        let mut record = MetricRecord::new(MetricType::TileLatency, latency_ms).with_task_type(task_type);
        record.node_id = node_id.map(str::to_string);
        self.record(record).await;
    }

    pub async fn record_dispatch_failure(&self, task_type: TaskType, node_id: &str, reason: &str) {
        let record = MetricRecord::new(MetricType::DispatchFailure, 1.0)
            .with_task_type(task_type)
            .with_node(node_id)
            .with_metadata(json!({ "reason": reason }));
        self.record(record).await;
    }

    /// Samples no older than `since`, newest first, at most `limit`.
    pub async fn recent(
        &self,
        since: DateTime<Utc>,
        metric_type: Option<MetricType>,
        limit: usize,
    ) -> Result<Vec<MetricRecord>, AevError> {
        Ok(self.repo.recent_metrics(since, metric_type, limit).await?)
    }

    /// Delete samples older than the retention window relative to `now`.
    pub async fn prune(&self, now: DateTime<Utc>) -> Result<usize, AevError> {
        let cutoff = now - self.config.retention();
        let removed = self.repo.prune_metrics(cutoff).await?;
        debug!(removed, cutoff = %cutoff, "metrics pruned");
        Ok(removed)
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
