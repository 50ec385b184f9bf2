//! Runtime Optimizer: periodic analysis of recorded latencies and
//! proportional adjustment of the tile size.
//!
//! A cycle runs the steps in order: analyze, publish a new tuning snapshot if
//! the tile size moved, sweep stale heartbeats, re-rank nodes, prune old
//! metrics. Cycles never overlap; a second caller gets
//! [`AevError::OptimizationSkipped`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use aevrt_core::config::OptimizerConfig;
use aevrt_core::{AevError, MetricRecord, MetricType, TaskType, TuningHandle};

use crate::coordinator::AevipCoordinator;
use crate::metrics::MetricsStore;

/// Latency distribution for one task type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyStats {
    pub count: usize,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub max_ms: f64,
}

impl LatencyStats {
    fn from_samples(mut samples: Vec<f64>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        samples.sort_by(f64::total_cmp);
        let count = samples.len();
        let mean_ms = samples.iter().sum::<f64>() / count as f64;
        Some(Self {
            count,
            mean_ms,
            p50_ms: percentile(&samples, 0.50),
            p95_ms: percentile(&samples, 0.95),
            max_ms: samples[count - 1],
        })
    }
}

/// Nearest-rank percentile over sorted samples.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Summary of the recent `task_latency` samples.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Analysis {
    pub samples: usize,
    /// Mean of raw task latencies.
    pub mean_latency_ms: Option<f64>,
    /// Mean latency after dividing each sample by its task type's latency
    /// multiplier. Diagnostic only; the control loop reads the raw mean.
    pub normalized_latency_ms: Option<f64>,
    pub per_type: BTreeMap<TaskType, LatencyStats>,
    pub avg_tiles_per_task: Option<f64>,
}

impl Analysis {
    pub fn from_records(records: &[MetricRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }

        let mut by_type: BTreeMap<TaskType, Vec<f64>> = BTreeMap::new();
        let mut total = 0.0;
        let mut normalized = 0.0;
        let mut tiles = Vec::new();

        for record in records {
            total += record.value;
            let multiplier = record.task_type.map_or(1, |t| t.latency_multiplier());
            normalized += record.value / multiplier as f64;
            if let Some(task_type) = record.task_type {
                by_type.entry(task_type).or_default().push(record.value);
            }
            if let Some(count) = record.tile_count() {
                tiles.push(count as f64);
            }
        }

        let samples = records.len();
        Self {
            samples,
            mean_latency_ms: Some(total / samples as f64),
            normalized_latency_ms: Some(normalized / samples as f64),
            per_type: by_type
                .into_iter()
                .filter_map(|(t, values)| LatencyStats::from_samples(values).map(|s| (t, s)))
                .collect(),
            avg_tiles_per_task: (!tiles.is_empty())
                .then(|| tiles.iter().sum::<f64>() / tiles.len() as f64),
        }
    }
}

/// Proportional step from `current` toward the latency target.
///
/// Driven by the raw mean task latency: above `max_latency_ms` the tile size
/// always goes down, whatever mix of task types produced it.
/// Monotonic in the observed latency and always within
/// `[tile_size_floor, tile_size_ceiling]`.
pub fn optimal_tile_size(
    analysis: &Analysis,
    current: usize,
    max_latency_ms: u64,
    config: &OptimizerConfig,
) -> usize {
    let floor = config.tile_size_floor.max(1);
    let ceiling = config.tile_size_ceiling.max(floor);
    let Some(observed) = analysis.mean_latency_ms else {
        return current.clamp(floor, ceiling);
    };

    let target = max_latency_ms as f64;
    let max_step = config.max_step_ratio.max(1.0);
    let overhead_dominates = analysis.avg_tiles_per_task.map_or(true, |t| t > 1.0);

    let ratio = if observed > target {
        (target / observed).clamp(1.0 / max_step, 1.0)
    } else if observed < target * config.low_watermark && overhead_dominates {
        if observed <= 0.0 {
            max_step
        } else {
            (target / observed).clamp(1.0, max_step)
        }
    } else {
        1.0
    };

    let next = (current as f64 * ratio).round();
    if next.is_finite() {
        (next as usize).clamp(floor, ceiling)
    } else {
        current.clamp(floor, ceiling)
    }
}

/// Outcome of one optimization cycle.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationReport {
    pub started_at: DateTime<Utc>,
    pub analysis: Analysis,
    pub previous_tile_size: usize,
    pub tile_size: usize,
    pub tuning_version: u64,
    pub nodes_demoted: Vec<String>,
    pub nodes_ranked: usize,
    pub metrics_pruned: usize,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl OptimizationReport {
    pub fn tile_size_changed(&self) -> bool {
        self.previous_tile_size != self.tile_size
    }
}

/// Clears the running flag when a cycle ends, including on early return.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct RuntimeOptimizer {
    tuning: TuningHandle,
    metrics: Arc<MetricsStore>,
    coordinator: Arc<AevipCoordinator>,
    config: OptimizerConfig,
    running: AtomicBool,
    cycles: AtomicU64,
}

impl RuntimeOptimizer {
    pub fn new(
        tuning: TuningHandle,
        metrics: Arc<MetricsStore>,
        coordinator: Arc<AevipCoordinator>,
        config: OptimizerConfig,
    ) -> Self {
        Self {
            tuning,
            metrics,
            coordinator,
            config,
            running: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
        }
    }

    /// Summarize task latencies recorded within the analysis window.
    pub async fn analyze_performance(&self) -> Result<Analysis, AevError> {
        self.analyze_performance_at(Utc::now()).await
    }

    pub async fn analyze_performance_at(&self, now: DateTime<Utc>) -> Result<Analysis, AevError> {
        let since = now - self.config.analysis_window();
        let records = self
            .metrics
            .recent(since, Some(MetricType::TaskLatency), self.config.analysis_max_samples)
            .await?;
        let analysis = Analysis::from_records(&records);
        debug!(
            samples = analysis.samples,
            mean_ms = analysis.mean_latency_ms.unwrap_or_default(),
            types = analysis.per_type.len(),
            "performance analyzed"
        );
        Ok(analysis)
    }

    /// Tile size the next snapshot should carry given `analysis`.
    pub fn calculate_optimal_tile_size(&self, analysis: &Analysis) -> usize {
        let current = self.tuning.current();
        optimal_tile_size(
            analysis,
            current.params.tile_size,
            current.params.max_latency_ms,
            &self.config,
        )
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub async fn run_optimization(&self) -> Result<OptimizationReport, AevError> {
        self.run_optimization_at(Utc::now()).await
    }

    pub async fn run_optimization_at(&self, now: DateTime<Utc>) -> Result<OptimizationReport, AevError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("optimization cycle already running, skipping");
            return Err(AevError::OptimizationSkipped);
        }
        let _guard = CycleGuard(&self.running);
        let started = Instant::now();

        let analysis = self.analyze_performance_at(now).await?;

        let before = self.tuning.current();
        let previous_tile_size = before.params.tile_size;
        let tile_size = self.calculate_optimal_tile_size(&analysis);
        let tuning_version = if tile_size != previous_tile_size {
            let after = self.tuning.update(|p| p.tile_size = tile_size);
            info!(
                from = previous_tile_size,
                to = tile_size,
                version = after.version,
                mean_ms = analysis.mean_latency_ms.unwrap_or_default(),
                "tile size adjusted"
            );
            after.version
        } else {
            before.version
        };

        let nodes_demoted = self.coordinator.sweep_heartbeats(now).await;

        let nodes_ranked = match self.coordinator.update_node_rankings().await {
            Ok(rankings) => rankings.len(),
            Err(e) => {
                warn!(error = %e, "node ranking failed");
                0
            }
        };

        let metrics_pruned = match self.metrics.prune(now).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "metric pruning failed");
                0
            }
        };

        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let report = OptimizationReport {
            started_at: now,
            analysis,
            previous_tile_size,
            tile_size,
            tuning_version,
            nodes_demoted,
            nodes_ranked,
            metrics_pruned,
            elapsed: started.elapsed(),
        };
        info!(
            cycle,
            samples = report.analysis.samples,
            tile_size = report.tile_size,
            demoted = report.nodes_demoted.len(),
            ranked = report.nodes_ranked,
            pruned = report.metrics_pruned,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "optimization cycle complete"
        );
        Ok(report)
    }
}
