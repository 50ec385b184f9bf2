//! `AevRuntime`: the entry point that wires scheduler, executor,
//! coordinator, metrics and optimizer together.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use aevrt_core::{
    AevError, HeartbeatStats, Node, RuntimeConfig, Task, TaskRequest, TileFailure, TuningHandle,
    TuningSnapshot,
};
use aevrt_storage::{InMemoryRepository, Repository};

use crate::backend::{DisconnectedTransport, EchoBackend, InferenceBackend, NodeTransport};
use crate::coordinator::AevipCoordinator;
use crate::executor::{ExecutionResult, TaskExecutor};
use crate::metrics::MetricsStore;
use crate::optimizer::{OptimizationReport, RuntimeOptimizer};
use crate::registry::NodeRegistry;
use crate::scheduler::TileScheduler;

/// Response returned to the submitter.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResponse {
    pub task_id: Uuid,
    /// Decomposed into more than one tile, or at least one tile ran remotely.
    pub optimized: bool,
    pub optimal_node: Option<String>,
    pub cache_key: Option<String>,
    /// Tile outputs in tile order.
    pub output: serde_json::Value,
    /// Tiles that produced no output. Empty on full success.
    pub failures: Vec<TileFailure>,
    pub tile_count: usize,
    pub elapsed_ms: u64,
}

impl From<ExecutionResult> for TaskResponse {
    fn from(result: ExecutionResult) -> Self {
        Self {
            task_id: result.task_id,
            optimized: result.tile_count > 1 || result.remote_tiles() > 0,
            optimal_node: result.optimal_node.clone(),
            cache_key: result.cache_key.clone(),
            output: result.output(),
            failures: result.failures,
            tile_count: result.tile_count,
            elapsed_ms: result.elapsed.as_millis() as u64,
        }
    }
}

/// Request counters, updated on every exit path of `submit`.
#[derive(Debug, Default)]
struct RequestCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    partial: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    cancelled: AtomicU64,
}

/// Point-in-time view of the runtime.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStats {
    pub tasks_submitted: u64,
    pub tasks_completed: u64,
    pub tasks_partial: u64,
    pub tasks_failed: u64,
    pub tasks_rejected: u64,
    pub tasks_cancelled: u64,
    pub tuning: TuningSnapshot,
    pub nodes_total: usize,
    pub nodes_online: usize,
    pub optimization_cycles: u64,
    pub metrics_written: u64,
    pub metrics_dropped: u64,
}

pub struct AevRuntime {
    config: RuntimeConfig,
    tuning: TuningHandle,
    scheduler: TileScheduler,
    executor: TaskExecutor,
    coordinator: Arc<AevipCoordinator>,
    metrics: Arc<MetricsStore>,
    optimizer: RuntimeOptimizer,
    counters: RequestCounters,
}

impl AevRuntime {
    /// Wire a runtime over the given storage, local back-end and transport.
    pub fn new(
        config: RuntimeConfig,
        repo: Arc<dyn Repository>,
        local: Arc<dyn InferenceBackend>,
        transport: Arc<dyn NodeTransport>,
    ) -> Result<Self, AevError> {
        config.validate()?;

        let tuning = TuningHandle::new(config.tuning.initial_parameters());
        let registry = Arc::new(NodeRegistry::new(config.coordinator.clone()));
        let coordinator = Arc::new(AevipCoordinator::new(registry, repo.clone()));
        let metrics = Arc::new(MetricsStore::new(repo, config.metrics.clone()));
        let scheduler = TileScheduler::new(tuning.clone(), config.scheduler.clone());
        let executor = TaskExecutor::new(
            local,
            transport,
            coordinator.clone(),
            metrics.clone(),
            config.scheduler.max_in_flight,
        );
        let optimizer = RuntimeOptimizer::new(
            tuning.clone(),
            metrics.clone(),
            coordinator.clone(),
            config.optimizer.clone(),
        );

        Ok(Self {
            config,
            tuning,
            scheduler,
            executor,
            coordinator,
            metrics,
            optimizer,
            counters: RequestCounters::default(),
        })
    }

    /// In-memory storage, echo back-end, no remote transport.
    pub fn standalone(config: RuntimeConfig) -> Result<Self, AevError> {
        Self::new(
            config,
            Arc::new(InMemoryRepository::new()),
            Arc::new(EchoBackend),
            Arc::new(DisconnectedTransport),
        )
    }

    /// Load persisted nodes into the registry.
    pub async fn start(&self) -> Result<(), AevError> {
        let nodes = self.coordinator.warm_from_repository().await?;
        info!(
            profile = self.config.profile_label(),
            nodes,
            tile_size = self.tuning.current().params.tile_size,
            "runtime started"
        );
        Ok(())
    }

    pub async fn submit(&self, request: TaskRequest) -> Result<TaskResponse, AevError> {
        self.submit_with_cancel(request, &CancellationToken::new()).await
    }

    /// Validate, schedule and execute one request. The request time is
    /// recorded whatever the outcome.
    pub async fn submit_with_cancel(
        &self,
        request: TaskRequest,
        cancel: &CancellationToken,
    ) -> Result<TaskResponse, AevError> {
        let started = Instant::now();
        let task_type = request.task_type;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);

        let result = self.run(request, cancel).await;

        let outcome = match &result {
            Ok(r) if r.failures.is_empty() => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                "ok"
            }
            Ok(_) => {
                self.counters.partial.fetch_add(1, Ordering::Relaxed);
                "partial"
            }
            Err(AevError::InvalidInput(_)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                "invalid"
            }
            Err(AevError::Cancelled) => {
                self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                "cancelled"
            }
            Err(_) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                "failed"
            }
        };
        match &result {
            Err(e) if e.is_caller_visible() => {
                warn!(task_type = %task_type, outcome, error = %e, "task not completed");
            }
            Err(e) => error!(task_type = %task_type, outcome, error = %e, "task failed internally"),
            Ok(_) => {}
        }

        self.metrics
            .record_request_time(Some(task_type), started.elapsed().as_secs_f64() * 1000.0, outcome)
            .await;
        result
    }

    async fn run(&self, request: TaskRequest, cancel: &CancellationToken) -> Result<TaskResponse, AevError> {
        let task = Task::from_request(request)?;
        let schedule = self.scheduler.schedule_task(&task)?;
        let result = self.executor.execute_schedule(schedule, cancel).await?;
        Ok(TaskResponse::from(result))
    }

    pub async fn record_heartbeat(&self, node_id: &str, stats: HeartbeatStats) -> Result<Node, AevError> {
        self.coordinator.record_heartbeat(node_id, stats).await
    }

    pub async fn run_optimization(&self) -> Result<OptimizationReport, AevError> {
        self.optimizer.run_optimization().await
    }

    pub fn stats(&self) -> RuntimeStats {
        let c = &self.counters;
        RuntimeStats {
            tasks_submitted: c.submitted.load(Ordering::Relaxed),
            tasks_completed: c.completed.load(Ordering::Relaxed),
            tasks_partial: c.partial.load(Ordering::Relaxed),
            tasks_failed: c.failed.load(Ordering::Relaxed),
            tasks_rejected: c.rejected.load(Ordering::Relaxed),
            tasks_cancelled: c.cancelled.load(Ordering::Relaxed),
            tuning: (*self.tuning.current()).clone(),
            nodes_total: self.coordinator.nodes().len(),
            nodes_online: self.coordinator.online_count(),
            optimization_cycles: self.optimizer.cycles(),
            metrics_written: self.metrics.written(),
            metrics_dropped: self.metrics.dropped(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn tuning(&self) -> &TuningHandle {
        &self.tuning
    }

    pub fn coordinator(&self) -> &Arc<AevipCoordinator> {
        &self.coordinator
    }

    pub fn metrics(&self) -> &Arc<MetricsStore> {
        &self.metrics
    }

    pub fn optimizer(&self) -> &RuntimeOptimizer {
        &self.optimizer
    }
}
