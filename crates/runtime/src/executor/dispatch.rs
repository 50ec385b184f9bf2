use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, warn};

use aevrt_core::{AevError, Node, Tile, TileFailure};

use super::{TaskExecutor, TileOutcome};

fn millis(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

impl TaskExecutor {
    /// Run one tile: remotely when allowed and a node is eligible, locally
    /// otherwise. A failed remote attempt gets exactly one local retry.
    pub(super) async fn run_tile(
        &self,
        tile: &Tile,
        hint: Option<&str>,
        remote: bool,
        deadline: Duration,
        permits: &Semaphore,
    ) -> Result<TileOutcome, TileFailure> {
        let _permit = permits.acquire().await.map_err(|e| TileFailure {
            tile_index: tile.tile_index,
            reason: format!("dispatch slot unavailable: {}", e),
        })?;

        let mut remote_error = None;
        if remote {
            if let Some(node) = self.resolve_node(tile, hint) {
                match self.dispatch_remote(&node, tile, deadline).await {
                    Ok(outcome) => return Ok(outcome),
                    Err(e) => remote_error = Some(e),
                }
            }
        }

        let fell_back = remote_error.is_some();
        let started = Instant::now();
        match self.local.execute(tile).await {
            Ok(output) => {
                let latency_ms = millis(started);
                self.metrics
                    .record_tile_latency(tile.task_type, None, latency_ms)
                    .await;
                debug!(
                    tile_index = tile.tile_index,
                    backend = self.local.name(),
                    latency_ms,
                    fell_back,
                    "tile executed locally"
                );
                Ok(TileOutcome {
                    tile_index: tile.tile_index,
                    node_id: None,
                    output,
                    latency_ms,
                    fell_back,
                })
            }
            Err(e) => {
                let reason = match remote_error {
                    Some(remote) => format!("{}; local retry failed: {}", remote, e),
                    None => e.to_string(),
                };
                warn!(tile_index = tile.tile_index, reason = %reason, "tile failed");
                Err(TileFailure {
                    tile_index: tile.tile_index,
                    reason,
                })
            }
        }
    }

    /// The hinted node if it is still eligible, otherwise a fresh selection.
    fn resolve_node(&self, tile: &Tile, hint: Option<&str>) -> Option<Node> {
        hint.and_then(|id| self.coordinator.is_eligible(id, tile.task_type))
            .or_else(|| self.coordinator.select_node(tile.task_type))
    }

    async fn dispatch_remote(
        &self,
        node: &Node,
        tile: &Tile,
        deadline: Duration,
    ) -> Result<TileOutcome, AevError> {
        let started = Instant::now();
        let reason = match timeout(deadline, self.transport.dispatch(node, tile)).await {
            Ok(Ok(output)) => {
                let latency_ms = millis(started);
                self.coordinator.record_dispatch(&node.node_id, latency_ms, true);
                self.metrics
                    .record_tile_latency(tile.task_type, Some(&node.node_id), latency_ms)
                    .await;
                debug!(
                    tile_index = tile.tile_index,
                    node = %node.node_id,
                    latency_ms,
                    "tile executed remotely"
                );
                return Ok(TileOutcome {
                    tile_index: tile.tile_index,
                    node_id: Some(node.node_id.clone()),
                    output,
                    latency_ms,
                    fell_back: false,
                });
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("no response within {}ms", deadline.as_millis()),
        };

        self.coordinator
            .record_dispatch(&node.node_id, millis(started), false);
        self.metrics
            .record_dispatch_failure(tile.task_type, &node.node_id, &reason)
            .await;

        let err = AevError::TileDispatchFailed {
            tile_index: tile.tile_index,
            reason,
        };
        warn!(node = %node.node_id, error = %err, "remote dispatch failed, retrying locally");
        Err(err)
    }
}
