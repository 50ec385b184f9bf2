use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::{Constraints, TaskType};
use crate::tuning::TuningSnapshot;

/// Slice of a parent task's input carried by one tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TilePayload {
    Text { text: String },
    Image { prompt: String, count: u32 },
    Audio { prompt: String, offset_ms: u64, duration_ms: u64 },
    Embedding { inputs: Vec<String> },
}

impl TilePayload {
    /// Size of the slice in the parent task's natural unit.
    pub fn size(&self) -> u64 {
        match self {
            TilePayload::Text { text } => text.chars().count() as u64,
            TilePayload::Image { count, .. } => u64::from(*count),
            TilePayload::Audio { duration_ms, .. } => *duration_ms,
            TilePayload::Embedding { inputs } => inputs.len() as u64,
        }
    }
}

/// Where a tile sits inside its parent task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SegmentMeta {
    /// The task was not decomposed.
    Whole,
    /// Character range `[start, end)` of a text input.
    Chars { start: usize, end: usize },
    /// One image of a batch.
    Batch { index: u32 },
    /// Time window of an audio task.
    Time { offset_ms: u64, duration_ms: u64 },
    /// Item range `[start, end)` of an embedding batch.
    Items { start: usize, end: usize },
}

/// A bounded sub-unit of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    pub task_id: Uuid,
    pub tile_index: usize,
    pub task_type: TaskType,
    pub payload: TilePayload,
    pub segment: SegmentMeta,
}

impl Tile {
    pub fn size(&self) -> u64 {
        self.payload.size()
    }
}

/// Per-request scheduling overrides. `None` falls back to the tuning snapshot.
#[derive(Debug, Clone, Default)]
pub struct ScheduleOptions {
    pub target_latency_ms: Option<u64>,
    pub prefetch: Option<bool>,
    pub distribute: Option<bool>,
}

impl From<&Constraints> for ScheduleOptions {
    fn from(c: &Constraints) -> Self {
        Self {
            target_latency_ms: c.latency_budget_ms,
            prefetch: c.prefetch,
            distribute: c.distribute,
        }
    }
}

/// Ordered tiles plus the directives for executing them.
///
/// Owned by one request; never persisted.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub task_id: Uuid,
    pub task_type: TaskType,
    pub priority: i32,
    /// Content hash of the parent task, used to derive cache keys.
    pub task_fingerprint: String,
    pub tiles: Vec<Tile>,
    pub target_latency_ms: u64,
    pub prefetch_enabled: bool,
    pub distribution_enabled: bool,
    /// Resolved node per tile; `None` until the coordinator picks one.
    pub node_hints: Vec<Option<String>>,
    /// Tuning snapshot the schedule was built against.
    pub tuning: Arc<TuningSnapshot>,
}

impl Schedule {
    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Whether tiles in this schedule may be routed to remote nodes.
    pub fn routes_remotely(&self) -> bool {
        self.distribution_enabled && self.tiles.len() > 1
    }

    pub fn set_hint(&mut self, tile_index: usize, node_id: impl Into<String>) {
        if let Some(slot) = self.node_hints.get_mut(tile_index) {
            *slot = Some(node_id.into());
        }
    }
}
