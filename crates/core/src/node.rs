use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::TaskType;

/// Health state of a compute node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Active,
    Busy,
    Offline,
}

impl NodeStatus {
    /// Valid transitions:
    /// active <-> busy, active/busy -> offline, offline -> active
    /// (the latter only on a fresh heartbeat).
    pub fn can_transition(self, to: NodeStatus) -> bool {
        use NodeStatus::*;
        match (self, to) {
            (a, b) if a == b => true,
            (Active, Busy) | (Busy, Active) => true,
            (Active, Offline) | (Busy, Offline) => true,
            (Offline, Active) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Active => write!(f, "active"),
            NodeStatus::Busy => write!(f, "busy"),
            NodeStatus::Offline => write!(f, "offline"),
        }
    }
}

/// A compute peer in the AevIP mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: String,
    pub node_type: String,
    pub status: NodeStatus,
    /// 0.0 - 1.0, may exceed 1.0 when oversubscribed.
    pub current_load: f64,
    /// Rolling average latency.
    pub avg_latency_ms: f64,
    /// Rolling success rate, 0 - 100.
    pub success_rate: f64,
    pub capabilities: BTreeSet<TaskType>,
    pub last_heartbeat: DateTime<Utc>,
    /// Position from the last ranking pass (0 = best).
    #[serde(default)]
    pub rank: Option<usize>,
    /// Composite score from the last ranking pass (lower is better).
    #[serde(default)]
    pub score: Option<f64>,
}

impl Node {
    pub fn can_serve(&self, task_type: TaskType) -> bool {
        self.capabilities.contains(&task_type)
    }

    pub fn is_eligible(&self, task_type: TaskType) -> bool {
        self.status == NodeStatus::Active && self.can_serve(task_type)
    }
}

/// Payload of a node heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatStats {
    #[serde(default = "default_node_type")]
    pub node_type: String,
    pub load: f64,
    /// Latency observed by the node itself, folded into the rolling average.
    #[serde(default)]
    pub latency_ms: Option<f64>,
    #[serde(default)]
    pub capabilities: BTreeSet<TaskType>,
}

fn default_node_type() -> String {
    "aevip".to_string()
}

impl HeartbeatStats {
    pub fn new(load: f64, capabilities: impl IntoIterator<Item = TaskType>) -> Self {
        Self {
            node_type: default_node_type(),
            load,
            latency_ms: None,
            capabilities: capabilities.into_iter().collect(),
        }
    }

    /// Heartbeat that only reports load; capabilities stay as registered.
    pub fn load_only(load: f64) -> Self {
        Self::new(load, std::iter::empty())
    }

    pub fn with_latency(mut self, latency_ms: f64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }
}
