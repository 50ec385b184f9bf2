//! Node Registry: known AevIP nodes with their health and rolling statistics.
//!
//! Backed by a `DashMap`, so heartbeats for different nodes lock different
//! shards. Bulk readers (ranking, selection) copy a snapshot and release the
//! shards before doing any work.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use aevrt_core::config::CoordinatorConfig;
use aevrt_core::{HeartbeatStats, Node, NodeStatus, TaskType};

#[derive(Debug, Clone)]
struct NodeEntry {
    node: Node,
    /// Number of latency observations folded into `avg_latency_ms`.
    latency_samples: u64,
}

pub struct NodeRegistry {
    nodes: DashMap<String, NodeEntry>,
    config: CoordinatorConfig,
}

impl NodeRegistry {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            nodes: DashMap::new(),
            config,
        }
    }

    /// Seed the registry from persisted nodes. Existing entries win.
    pub fn warm(&self, nodes: Vec<Node>) {
        for node in nodes {
            self.nodes
                .entry(node.node_id.clone())
                .or_insert_with(|| NodeEntry { latency_samples: 1, node });
        }
    }

    fn status_for_load(&self, load: f64) -> NodeStatus {
        if load >= self.config.busy_load_threshold {
            NodeStatus::Busy
        } else {
            NodeStatus::Active
        }
    }

    fn fold(avg: f64, sample: f64, samples: u64, alpha: f64) -> f64 {
        if samples == 0 {
            sample
        } else {
            alpha * sample + (1.0 - alpha) * avg
        }
    }

    /// Upsert a node from a heartbeat and return its new state.
    ///
    /// This is the only path by which an offline node becomes eligible again.
    /// A recovering node always comes back active; the load threshold applies
    /// from its next heartbeat on.
    pub fn apply_heartbeat(&self, node_id: &str, stats: &HeartbeatStats, now: DateTime<Utc>) -> Node {
        let load_status = self.status_for_load(stats.load);
        let alpha = self.config.ema_alpha;

        let mut entry = self.nodes.entry(node_id.to_string()).or_insert_with(|| {
            info!(node = node_id, node_type = %stats.node_type, "node registered");
            NodeEntry {
                node: Node {
                    node_id: node_id.to_string(),
                    node_type: stats.node_type.clone(),
                    status: load_status,
                    current_load: stats.load,
                    avg_latency_ms: 0.0,
                    success_rate: 100.0,
                    capabilities: stats.capabilities.clone(),
                    last_heartbeat: now,
                    rank: None,
                    score: None,
                },
                latency_samples: 0,
            }
        });

        let previous = entry.node.status;
        let next_status = if previous == NodeStatus::Offline {
            NodeStatus::Active
        } else {
            load_status
        };
        if previous != next_status {
            debug_assert!(previous.can_transition(next_status));
            if previous == NodeStatus::Offline {
                info!(node = node_id, status = %next_status, "node back online");
            } else {
                debug!(node = node_id, from = %previous, to = %next_status, "node status changed");
            }
        }

        let samples = entry.latency_samples;
        let node = &mut entry.node;
        node.status = next_status;
        node.current_load = stats.load;
        node.node_type = stats.node_type.clone();
        node.last_heartbeat = now;
        if !stats.capabilities.is_empty() {
            node.capabilities = stats.capabilities.clone();
        }
        if let Some(latency) = stats.latency_ms {
            node.avg_latency_ms = Self::fold(node.avg_latency_ms, latency, samples, alpha);
            entry.latency_samples += 1;
        }
        entry.node.clone()
    }

    /// Fold the outcome of one remote dispatch into the node's rolling stats.
    pub fn record_dispatch(&self, node_id: &str, latency_ms: f64, success: bool) -> Option<Node> {
        let alpha = self.config.ema_alpha;
        let mut entry = self.nodes.get_mut(node_id)?;
        let samples = entry.latency_samples;
        let node = &mut entry.node;
        if success {
            node.avg_latency_ms = Self::fold(node.avg_latency_ms, latency_ms, samples, alpha);
        }
        let outcome = if success { 100.0 } else { 0.0 };
        node.success_rate = (alpha * outcome + (1.0 - alpha) * node.success_rate).clamp(0.0, 100.0);
        if success {
            entry.latency_samples += 1;
        }
        Some(entry.node.clone())
    }

    /// Demote nodes whose last heartbeat is older than the timeout.
    pub fn mark_stale_offline(&self, now: DateTime<Utc>) -> Vec<Node> {
        let timeout = self.config.heartbeat_timeout();
        let mut demoted = Vec::new();
        for mut entry in self.nodes.iter_mut() {
            let node = &mut entry.node;
            if node.status != NodeStatus::Offline && now - node.last_heartbeat > timeout {
                warn!(
                    node = %node.node_id,
                    last_heartbeat = %node.last_heartbeat,
                    "heartbeat timeout, marking node offline"
                );
                node.status = NodeStatus::Offline;
                demoted.push(node.clone());
            }
        }
        demoted
    }

    /// Whether the node's heartbeat is still within the timeout window.
    pub fn is_fresh(&self, node: &Node, now: DateTime<Utc>) -> bool {
        now - node.last_heartbeat <= self.config.heartbeat_timeout()
    }

    /// Nodes eligible for `task_type`: active, capable and heartbeat-fresh.
    pub fn candidates(&self, task_type: TaskType, now: DateTime<Utc>) -> Vec<Node> {
        self.nodes
            .iter()
            .map(|e| e.node.clone())
            .filter(|n| n.is_eligible(task_type) && self.is_fresh(n, now))
            .collect()
    }

    /// Consistent copy of every node.
    pub fn snapshot(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.nodes.iter().map(|e| e.node.clone()).collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    /// Write ranking results back. Nodes missing from `ranks` lose their rank.
    pub fn apply_rankings(&self, ranks: &[(String, usize, f64)]) {
        for mut entry in self.nodes.iter_mut() {
            entry.node.rank = None;
            entry.node.score = None;
        }
        for (node_id, rank, score) in ranks {
            if let Some(mut entry) = self.nodes.get_mut(node_id) {
                entry.node.rank = Some(*rank);
                entry.node.score = Some(*score);
            }
        }
    }

    pub fn get(&self, node_id: &str) -> Option<Node> {
        self.nodes.get(node_id).map(|e| e.node.clone())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn online_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|e| e.node.status != NodeStatus::Offline)
            .count()
    }
}
