pub mod backend;
pub mod coordinator;
pub mod executor;
pub mod metrics;
pub mod optimizer;
pub mod registry;
pub mod runtime;
pub mod scheduler;

pub use backend::{
    BackendError, DisconnectedTransport, EchoBackend, InferenceBackend, NodeTransport, TileOutput,
};
pub use coordinator::{AevipCoordinator, NodeRanking};
pub use executor::{ExecutionResult, TaskExecutor, TileOutcome};
pub use metrics::MetricsStore;
pub use optimizer::{Analysis, LatencyStats, OptimizationReport, RuntimeOptimizer};
pub use registry::NodeRegistry;
pub use runtime::{AevRuntime, RuntimeStats, TaskResponse};
pub use scheduler::TileScheduler;
