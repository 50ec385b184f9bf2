use serde::Serialize;
use thiserror::Error;

/// A tile that could not be completed, locally or remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TileFailure {
    pub tile_index: usize,
    pub reason: String,
}

impl std::fmt::Display for TileFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tile {}: {}", self.tile_index, self.reason)
    }
}

#[derive(Error, Debug)]
pub enum AevError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Tile {tile_index} dispatch failed: {reason}")]
    TileDispatchFailed { tile_index: usize, reason: String },

    #[error("Execution failed: all {} tiles failed", failures.len())]
    ExecutionFailed { failures: Vec<TileFailure> },

    #[error("Optimization skipped: a cycle is already running")]
    OptimizationSkipped,

    #[error("Request cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AevError {
    /// Whether the error is surfaced to the task submitter.
    ///
    /// Everything else is absorbed by the runtime and only logged.
    pub fn is_caller_visible(&self) -> bool {
        matches!(
            self,
            AevError::InvalidInput(_) | AevError::ExecutionFailed { .. } | AevError::Cancelled
        )
    }
}
