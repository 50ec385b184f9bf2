//! Task Executor: runs a schedule's tiles locally or on AevIP nodes and
//! aggregates the outputs.
//!
//! Split into focused submodules:
//! - `dispatch`: per-tile routing, remote deadline and local fallback
//! - `aggregate`: ordering, optimal node and cache key
//! - `tests`: executor tests with scripted back-ends

mod aggregate;
mod dispatch;

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use aevrt_core::{AevError, Schedule, TaskType, TileFailure};

use crate::backend::{InferenceBackend, NodeTransport, TileOutput};
use crate::coordinator::AevipCoordinator;
use crate::metrics::MetricsStore;

pub use self::aggregate::{cache_key, optimal_node};

/// Output of one tile, tagged with where it ran.
#[derive(Debug, Clone, Serialize)]
pub struct TileOutcome {
    pub tile_index: usize,
    /// Remote node that produced the output; `None` for local execution.
    pub node_id: Option<String>,
    pub output: TileOutput,
    pub latency_ms: f64,
    /// The tile was retried locally after a failed remote dispatch.
    pub fell_back: bool,
}

/// Aggregated result of one schedule.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub task_id: Uuid,
    pub task_type: TaskType,
    /// Successful tiles in ascending `tile_index` order.
    pub outputs: Vec<TileOutcome>,
    pub failures: Vec<TileFailure>,
    pub optimal_node: Option<String>,
    pub cache_key: Option<String>,
    pub tile_count: usize,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl ExecutionResult {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn remote_tiles(&self) -> usize {
        self.outputs.iter().filter(|o| o.node_id.is_some()).count()
    }

    /// Tile outputs as a JSON array, in tile order.
    pub fn output(&self) -> serde_json::Value {
        serde_json::Value::Array(self.outputs.iter().map(|o| o.output.clone()).collect())
    }
}

pub struct TaskExecutor {
    local: Arc<dyn InferenceBackend>,
    transport: Arc<dyn NodeTransport>,
    coordinator: Arc<AevipCoordinator>,
    metrics: Arc<MetricsStore>,
    max_in_flight: usize,
}

impl TaskExecutor {
    pub fn new(
        local: Arc<dyn InferenceBackend>,
        transport: Arc<dyn NodeTransport>,
        coordinator: Arc<AevipCoordinator>,
        metrics: Arc<MetricsStore>,
        max_in_flight: usize,
    ) -> Self {
        Self {
            local,
            transport,
            coordinator,
            metrics,
            max_in_flight: max_in_flight.max(1),
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Execute every tile of `schedule` and aggregate the outputs.
    ///
    /// Partial failure is a successful result with `failures` populated; only
    /// a schedule where no tile produced output is an error.
    pub async fn execute_schedule(
        &self,
        mut schedule: Schedule,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, AevError> {
        let started = Instant::now();
        let remote = schedule.routes_remotely();

        if remote && schedule.prefetch_enabled {
            self.prefetch_hints(&mut schedule);
        }

        let deadline = Duration::from_millis(schedule.target_latency_ms);
        let permits = Semaphore::new(self.max_in_flight);
        let runs = schedule
            .tiles
            .iter()
            .zip(schedule.node_hints.iter())
            .map(|(tile, hint)| self.run_tile(tile, hint.as_deref(), remote, deadline, &permits));

        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(task_id = %schedule.task_id, "execution cancelled");
                return Err(AevError::Cancelled);
            }
            results = join_all(runs) => results,
        };

        let mut outputs = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(outcome) => outputs.push(outcome),
                Err(failure) => failures.push(failure),
            }
        }
        outputs.sort_by_key(|o| o.tile_index);
        failures.sort_by_key(|f| f.tile_index);

        let tile_count = schedule.tile_count();
        let elapsed = started.elapsed();

        if outputs.is_empty() {
            warn!(
                task_id = %schedule.task_id,
                tiles = tile_count,
                "every tile failed"
            );
            return Err(AevError::ExecutionFailed { failures });
        }

        self.metrics
            .record_task_latency(
                schedule.task_type,
                elapsed.as_secs_f64() * 1000.0,
                tile_count,
                failures.len(),
                schedule.priority,
            )
            .await;

        let params = &schedule.tuning.params;
        let cache_key = params
            .enable_caching
            .then(|| cache_key(&schedule.task_fingerprint, params));
        let optimal_node = optimal_node(&outputs);

        debug!(
            task_id = %schedule.task_id,
            tiles = tile_count,
            failed = failures.len(),
            optimal_node = optimal_node.as_deref().unwrap_or("local"),
            elapsed_ms = elapsed.as_millis() as u64,
            "schedule executed"
        );

        Ok(ExecutionResult {
            task_id: schedule.task_id,
            task_type: schedule.task_type,
            outputs,
            failures,
            optimal_node,
            cache_key,
            tile_count,
            elapsed,
        })
    }

    /// Resolve a node for every tile before dispatch starts.
    fn prefetch_hints(&self, schedule: &mut Schedule) {
        for index in 0..schedule.tile_count() {
            if let Some(node) = self.coordinator.select_node(schedule.task_type) {
                schedule.set_hint(index, node.node_id);
            }
        }
    }
}
