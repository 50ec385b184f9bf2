//! End-to-end tests: submit → schedule → execute → metrics → optimize.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use aevrt_core::{
    AevError, Constraints, HeartbeatStats, MetricType, Node, RuntimeConfig, TaskInput, TaskRequest,
    TaskType, Tile, TilePayload,
};
use aevrt_runtime::{AevRuntime, BackendError, EchoBackend, InferenceBackend, NodeTransport, TileOutput};
use aevrt_storage::InMemoryRepository;

/// Transport that answers for every node and counts dispatches.
#[derive(Default)]
struct CountingTransport {
    dispatches: AtomicUsize,
}

#[async_trait]
impl NodeTransport for CountingTransport {
    async fn dispatch(&self, node: &Node, tile: &Tile) -> Result<TileOutput, BackendError> {
        self.dispatches.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "node": node.node_id, "tile": tile.tile_index }))
    }
}

/// Local back-end with a fixed per-tile delay.
struct SlowBackend {
    per_tile: Duration,
}

#[async_trait]
impl InferenceBackend for SlowBackend {
    async fn execute(&self, tile: &Tile) -> Result<TileOutput, BackendError> {
        tokio::time::sleep(self.per_tile).await;
        Ok(json!({ "tile": tile.tile_index }))
    }

    fn name(&self) -> &str {
        "slow"
    }
}

fn request(input: TaskInput) -> TaskRequest {
    TaskRequest {
        task_type: input.task_type(),
        priority: 5,
        input,
        constraints: Constraints::default(),
    }
}

fn runtime_with(
    config: RuntimeConfig,
    local: Arc<dyn InferenceBackend>,
    transport: Arc<dyn NodeTransport>,
) -> (Arc<InMemoryRepository>, AevRuntime) {
    let repo = Arc::new(InMemoryRepository::new());
    let runtime = AevRuntime::new(config, repo.clone(), local, transport).unwrap();
    (repo, runtime)
}

#[tokio::test]
async fn language_task_splits_into_four_tiles() {
    let rt = AevRuntime::standalone(RuntimeConfig::default()).unwrap();
    let text: String = "abcdefghij".repeat(100);

    let response = rt
        .submit(request(TaskInput::Language { text: text.clone() }))
        .await
        .unwrap();

    assert_eq!(response.tile_count, 4);
    let tiles = response.output.as_array().unwrap();
    let rebuilt: String = tiles
        .iter()
        .map(|t| t["output"]["text"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(rebuilt, text);
    let sizes: Vec<usize> = tiles
        .iter()
        .map(|t| t["output"]["text"].as_str().unwrap().chars().count())
        .collect();
    assert_eq!(sizes, vec![256, 256, 256, 232]);
}

#[tokio::test]
async fn image_batch_fans_out_to_capable_node() {
    let transport = Arc::new(CountingTransport::default());
    let (_repo, rt) = runtime_with(RuntimeConfig::default(), Arc::new(EchoBackend), transport.clone());
    rt.record_heartbeat("gpu-1", HeartbeatStats::new(0.2, [TaskType::Image]).with_latency(30.0))
        .await
        .unwrap();
    rt.record_heartbeat("cpu-1", HeartbeatStats::new(0.0, [TaskType::Language]))
        .await
        .unwrap();

    let response = rt
        .submit(request(TaskInput::Image { prompt: "a red fox".into(), count: 3 }))
        .await
        .unwrap();

    assert!(response.optimized);
    assert_eq!(response.tile_count, 3);
    assert_eq!(response.optimal_node.as_deref(), Some("gpu-1"));
    assert_eq!(transport.dispatches.load(Ordering::SeqCst), 3);
    let tiles: Vec<u64> = response
        .output
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["tile"].as_u64().unwrap())
        .collect();
    assert_eq!(tiles, vec![0, 1, 2]);
}

#[tokio::test]
async fn music_task_uses_ten_second_segments() {
    let rt = AevRuntime::standalone(RuntimeConfig::default()).unwrap();

    let response = rt
        .submit(request(TaskInput::Music { prompt: "lofi".into(), duration_ms: 25_000 }))
        .await
        .unwrap();

    let windows: Vec<(u64, u64)> = response
        .output
        .as_array()
        .unwrap()
        .iter()
        .map(|t| {
            (
                t["output"]["offset_ms"].as_u64().unwrap(),
                t["output"]["duration_ms"].as_u64().unwrap(),
            )
        })
        .collect();
    assert_eq!(windows, vec![(0, 10_000), (10_000, 10_000), (20_000, 5_000)]);
}

#[tokio::test]
async fn slow_tasks_shrink_tile_size_next_cycle() {
    let mut config = RuntimeConfig::default();
    config.tuning.enable_aevip = false;
    config.scheduler.max_in_flight = 1;
    // Four sequential 40ms tiles put a language task well over 100ms.
    let (_repo, rt) = runtime_with(
        config,
        Arc::new(SlowBackend { per_tile: Duration::from_millis(40) }),
        Arc::new(CountingTransport::default()),
    );

    for _ in 0..3 {
        rt.submit(request(TaskInput::Language { text: "x".repeat(1000) }))
            .await
            .unwrap();
    }

    let report = rt.run_optimization().await.unwrap();
    assert_eq!(report.analysis.samples, 3);
    assert!(report.analysis.mean_latency_ms.unwrap() > 100.0);
    assert!(report.tile_size < 256);
    assert_eq!(rt.tuning().current().params.tile_size, report.tile_size);
    assert!(report.tile_size >= rt.config().optimizer.tile_size_floor);
}

#[tokio::test]
async fn fast_tasks_grow_tile_size_within_ceiling() {
    let mut config = RuntimeConfig::default();
    config.optimizer.tile_size_ceiling = 300;
    let rt = AevRuntime::standalone(config).unwrap();

    for _ in 0..3 {
        rt.submit(request(TaskInput::Language { text: "x".repeat(1000) }))
            .await
            .unwrap();
    }

    let report = rt.run_optimization().await.unwrap();
    assert!(report.analysis.mean_latency_ms.unwrap() < 50.0);
    assert_eq!(report.tile_size, 300);

    // A second cycle cannot push past the ceiling.
    let report = rt.run_optimization().await.unwrap();
    assert_eq!(report.tile_size, 300);
    assert_eq!(rt.stats().optimization_cycles, 2);
}

#[tokio::test]
async fn request_time_recorded_for_every_outcome() {
    let (repo, rt) = runtime_with(
        RuntimeConfig::default(),
        Arc::new(SlowBackend { per_tile: Duration::from_secs(5) }),
        Arc::new(CountingTransport::default()),
    );

    // Rejected: zero-size input.
    let err = rt
        .submit(request(TaskInput::Language { text: String::new() }))
        .await
        .unwrap_err();
    assert!(matches!(err, AevError::InvalidInput(_)));

    // Cancelled before any tile completes.
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = rt
        .submit_with_cancel(request(TaskInput::Reasoning { prompt: "think".into() }), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, AevError::Cancelled));

    assert_eq!(repo.metric_count_of(MetricType::RequestTime), 2);
    assert_eq!(repo.metric_count_of(MetricType::TaskLatency), 0);
    let stats = rt.stats();
    assert_eq!(stats.tasks_submitted, 2);
    assert_eq!(stats.tasks_rejected, 1);
    assert_eq!(stats.tasks_cancelled, 1);
}

#[tokio::test]
async fn offline_node_needs_fresh_heartbeat() {
    let transport = Arc::new(CountingTransport::default());
    let mut config = RuntimeConfig::default();
    config.coordinator.heartbeat_timeout_secs = 1;
    let (_repo, rt) = runtime_with(config, Arc::new(EchoBackend), transport.clone());

    rt.record_heartbeat("n1", HeartbeatStats::new(0.1, [TaskType::Embedding]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    rt.run_optimization().await.unwrap();
    assert_eq!(rt.stats().nodes_online, 0);

    let inputs: Vec<String> = (0..600).map(|i| format!("doc {i}")).collect();
    let response = rt
        .submit(request(TaskInput::Embedding { inputs: inputs.clone() }))
        .await
        .unwrap();
    assert!(response.optimal_node.is_none());
    assert_eq!(transport.dispatches.load(Ordering::SeqCst), 0);

    rt.record_heartbeat("n1", HeartbeatStats::load_only(0.1)).await.unwrap();
    let response = rt
        .submit(request(TaskInput::Embedding { inputs }))
        .await
        .unwrap();
    assert_eq!(response.optimal_node.as_deref(), Some("n1"));
}

#[tokio::test]
async fn identical_requests_share_cache_key() {
    let rt = AevRuntime::standalone(RuntimeConfig::default()).unwrap();
    let a = rt
        .submit(request(TaskInput::Language { text: "same text".into() }))
        .await
        .unwrap();
    let b = rt
        .submit(request(TaskInput::Language { text: "same text".into() }))
        .await
        .unwrap();
    assert_ne!(a.task_id, b.task_id);
    assert_eq!(a.cache_key, b.cache_key);

    rt.tuning().update(|p| p.tile_size = 64);
    let c = rt
        .submit(request(TaskInput::Language { text: "same text".into() }))
        .await
        .unwrap();
    assert_ne!(a.cache_key, c.cache_key);
}

#[test]
fn tile_payload_reports_natural_size() {
    let payload = TilePayload::Embedding { inputs: vec!["a".into(), "b".into()] };
    assert_eq!(payload.size(), 2);
}
