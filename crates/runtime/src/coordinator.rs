//! AevIP Coordinator: node selection and health bookkeeping.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use aevrt_core::{AevError, HeartbeatStats, Node, NodeStatus, TaskType};
use aevrt_storage::Repository;

use crate::registry::NodeRegistry;

/// Weight of each failed-request percentage point in the composite score.
const SUCCESS_WEIGHT: f64 = 10.0;
/// Weight of a fully loaded node in the composite score.
const LOAD_WEIGHT: f64 = 100.0;

/// Result of one ranking pass for one node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeRanking {
    pub node_id: String,
    pub rank: usize,
    pub score: f64,
}

/// Composite health score, lower is better.
///
///   score = avg_latency_ms + (100 - success_rate) * 10 + load * 100
pub fn composite_score(node: &Node) -> f64 {
    node.avg_latency_ms
        + (100.0 - node.success_rate).max(0.0) * SUCCESS_WEIGHT
        + node.current_load.max(0.0) * LOAD_WEIGHT
}

/// Candidate ordering: lower latency, then higher success rate, then lower
/// load, then the last ranking position, then node id for determinism.
pub fn compare_candidates(a: &Node, b: &Node) -> Ordering {
    a.avg_latency_ms
        .total_cmp(&b.avg_latency_ms)
        .then_with(|| b.success_rate.total_cmp(&a.success_rate))
        .then_with(|| a.current_load.total_cmp(&b.current_load))
        .then_with(|| {
            a.rank
                .unwrap_or(usize::MAX)
                .cmp(&b.rank.unwrap_or(usize::MAX))
        })
        .then_with(|| a.node_id.cmp(&b.node_id))
}

pub struct AevipCoordinator {
    registry: Arc<NodeRegistry>,
    repo: Arc<dyn Repository>,
}

impl AevipCoordinator {
    pub fn new(registry: Arc<NodeRegistry>, repo: Arc<dyn Repository>) -> Self {
        Self { registry, repo }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Every known node, sorted by id.
    pub fn nodes(&self) -> Vec<Node> {
        self.registry.snapshot()
    }

    pub fn node(&self, node_id: &str) -> Option<Node> {
        self.registry.get(node_id)
    }

    pub fn online_count(&self) -> usize {
        self.registry.online_count()
    }

    /// Load persisted nodes into the registry (startup).
    pub async fn warm_from_repository(&self) -> Result<usize, AevError> {
        let nodes = self.repo.list_nodes().await?;
        let count = nodes.len();
        self.registry.warm(nodes);
        info!(nodes = count, "node registry warmed from repository");
        Ok(count)
    }

    /// Best eligible node for `task_type`, or `None` when the caller should
    /// run locally. Offline, busy, stale or incapable nodes are never returned.
    pub fn select_node(&self, task_type: TaskType) -> Option<Node> {
        self.select_node_at(task_type, Utc::now())
    }

    pub fn select_node_at(&self, task_type: TaskType, now: DateTime<Utc>) -> Option<Node> {
        let mut candidates = self.registry.candidates(task_type, now);
        if candidates.is_empty() {
            debug!(task_type = %task_type, "no eligible node");
            return None;
        }
        candidates.sort_by(compare_candidates);
        let best = candidates.swap_remove(0);
        debug!(
            task_type = %task_type,
            node = %best.node_id,
            latency_ms = best.avg_latency_ms,
            success_rate = best.success_rate,
            load = best.current_load,
            "node selected"
        );
        Some(best)
    }

    /// Whether a previously resolved node may still receive work.
    pub fn is_eligible(&self, node_id: &str, task_type: TaskType) -> Option<Node> {
        let now = Utc::now();
        self.registry
            .get(node_id)
            .filter(|n| n.is_eligible(task_type) && self.registry.is_fresh(n, now))
    }

    /// Upsert a node from a heartbeat and persist it.
    pub async fn record_heartbeat(&self, node_id: &str, stats: HeartbeatStats) -> Result<Node, AevError> {
        self.record_heartbeat_at(node_id, stats, Utc::now()).await
    }

    pub async fn record_heartbeat_at(
        &self,
        node_id: &str,
        stats: HeartbeatStats,
        now: DateTime<Utc>,
    ) -> Result<Node, AevError> {
        let node = self.registry.apply_heartbeat(node_id, &stats, now);
        self.repo.upsert_node(&node).await?;
        Ok(node)
    }

    /// Feed the outcome of a remote dispatch back into the node's statistics.
    pub fn record_dispatch(&self, node_id: &str, latency_ms: f64, success: bool) {
        if self.registry.record_dispatch(node_id, latency_ms, success).is_none() {
            debug!(node = node_id, "dispatch outcome for unknown node ignored");
        }
    }

    /// Mark nodes with expired heartbeats offline. Returns the demoted ids.
    pub async fn sweep_heartbeats(&self, now: DateTime<Utc>) -> Vec<String> {
        let demoted = self.registry.mark_stale_offline(now);
        for node in &demoted {
            if let Err(e) = self.repo.upsert_node(node).await {
                warn!(node = %node.node_id, error = %e, "failed to persist offline node");
            }
        }
        demoted.into_iter().map(|n| n.node_id).collect()
    }

    /// Recompute composite scores for every reachable node from a registry
    /// snapshot and write the resulting order back.
    pub async fn update_node_rankings(&self) -> Result<Vec<NodeRanking>, AevError> {
        let snapshot = self.registry.snapshot();

        let mut scored: Vec<(Node, f64)> = snapshot
            .into_iter()
            .filter(|n| n.status != NodeStatus::Offline)
            .map(|n| {
                let score = composite_score(&n);
                (n, score)
            })
            .collect();
        scored.sort_by(|(a, sa), (b, sb)| sa.total_cmp(sb).then_with(|| a.node_id.cmp(&b.node_id)));

        let rankings: Vec<NodeRanking> = scored
            .iter()
            .enumerate()
            .map(|(rank, (node, score))| NodeRanking {
                node_id: node.node_id.clone(),
                rank,
                score: *score,
            })
            .collect();

        let ranks: Vec<(String, usize, f64)> = rankings
            .iter()
            .map(|r| (r.node_id.clone(), r.rank, r.score))
            .collect();
        self.registry.apply_rankings(&ranks);

        for ranking in &rankings {
            if let Some(node) = self.registry.get(&ranking.node_id) {
                self.repo.upsert_node(&node).await?;
            }
        }

        info!(ranked = rankings.len(), "node rankings updated");
        Ok(rankings)
    }
}

#[cfg(test)]
mod tests {
    use aevrt_core::config::CoordinatorConfig;
    use aevrt_storage::InMemoryRepository;
    use chrono::Duration;

    use super::*;

    fn coordinator() -> (Arc<InMemoryRepository>, AevipCoordinator) {
        let repo = Arc::new(InMemoryRepository::new());
        let registry = Arc::new(NodeRegistry::new(CoordinatorConfig::default()));
        (repo.clone(), AevipCoordinator::new(registry, repo))
    }

    async fn beat(c: &AevipCoordinator, id: &str, load: f64, latency: f64, caps: &[TaskType]) {
        c.record_heartbeat(id, HeartbeatStats::new(load, caps.iter().copied()).with_latency(latency))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn selects_lowest_latency_capable_node() {
        let (_repo, c) = coordinator();
        beat(&c, "slow", 0.1, 80.0, &[TaskType::Language]).await;
        beat(&c, "fast", 0.1, 20.0, &[TaskType::Language]).await;
        beat(&c, "image-only", 0.0, 5.0, &[TaskType::Image]).await;

        let node = c.select_node(TaskType::Language).unwrap();
        assert_eq!(node.node_id, "fast");
        assert_eq!(c.select_node(TaskType::Image).unwrap().node_id, "image-only");
        assert!(c.select_node(TaskType::Music).is_none());
    }

    #[tokio::test]
    async fn tie_breaks_follow_success_then_load() {
        let (_repo, c) = coordinator();
        beat(&c, "a", 0.5, 20.0, &[TaskType::Language]).await;
        beat(&c, "b", 0.1, 20.0, &[TaskType::Language]).await;
        assert_eq!(c.select_node(TaskType::Language).unwrap().node_id, "b");

        // A failure on b drops its success rate below a's.
        c.record_dispatch("b", 20.0, false);
        assert_eq!(c.select_node(TaskType::Language).unwrap().node_id, "a");
    }

    #[tokio::test]
    async fn never_selects_offline_or_busy_nodes() {
        let (_repo, c) = coordinator();
        c.record_heartbeat_at(
            "stale",
            HeartbeatStats::new(0.0, [TaskType::Language]).with_latency(1.0),
            Utc::now() - Duration::seconds(600),
        )
        .await
        .unwrap();
        beat(&c, "busy", 0.99, 1.0, &[TaskType::Language]).await;

        assert!(c.select_node(TaskType::Language).is_none());

        let demoted = c.sweep_heartbeats(Utc::now()).await;
        assert_eq!(demoted, vec!["stale".to_string()]);
        assert!(c.select_node(TaskType::Language).is_none());

        // Fresh heartbeat is the way back.
        beat(&c, "stale", 0.1, 1.0, &[TaskType::Language]).await;
        assert_eq!(c.select_node(TaskType::Language).unwrap().node_id, "stale");
    }

    #[tokio::test]
    async fn rankings_exclude_offline_and_persist() {
        let (repo, c) = coordinator();
        beat(&c, "good", 0.1, 10.0, &[TaskType::Language]).await;
        beat(&c, "worse", 0.9, 40.0, &[TaskType::Language]).await;
        c.record_heartbeat_at(
            "gone",
            HeartbeatStats::new(0.0, [TaskType::Language]),
            Utc::now() - Duration::seconds(600),
        )
        .await
        .unwrap();
        c.sweep_heartbeats(Utc::now()).await;

        let rankings = c.update_node_rankings().await.unwrap();
        assert_eq!(rankings.len(), 2);
        assert_eq!(rankings[0].node_id, "good");
        assert_eq!(rankings[0].rank, 0);
        assert!(rankings[0].score < rankings[1].score);

        assert_eq!(c.registry().get("good").unwrap().rank, Some(0));
        assert_eq!(c.registry().get("gone").unwrap().rank, None);

        let stored = repo.list_nodes().await.unwrap();
        let good = stored.iter().find(|n| n.node_id == "good").unwrap();
        assert_eq!(good.rank, Some(0));
    }

    #[test]
    fn composite_score_weights() {
        let node = Node {
            node_id: "n".into(),
            node_type: "t".into(),
            status: NodeStatus::Active,
            current_load: 0.5,
            avg_latency_ms: 30.0,
            success_rate: 90.0,
            capabilities: Default::default(),
            last_heartbeat: Utc::now(),
            rank: None,
            score: None,
        };
        assert!((composite_score(&node) - (30.0 + 100.0 + 50.0)).abs() < 1e-9);
    }
}
