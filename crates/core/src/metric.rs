use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::TaskType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// End-to-end execution time of one task's schedule.
    TaskLatency,
    /// Wall time of one inbound request, including validation and scheduling.
    RequestTime,
    /// One tile dispatch, local or remote.
    TileLatency,
    /// A remote dispatch that failed or timed out.
    DispatchFailure,
}

/// Immutable, timestamped performance sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub metric_type: MetricType,
    pub value: f64,
    pub node_id: Option<String>,
    pub task_type: Option<TaskType>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl MetricRecord {
    pub fn new(metric_type: MetricType, value: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            metric_type,
            value,
            node_id: None,
            task_type: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = Some(task_type);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Tile count recorded on `task_latency` samples.
    pub fn tile_count(&self) -> Option<u64> {
        self.metadata.get("tile_count").and_then(|v| v.as_u64())
    }
}
