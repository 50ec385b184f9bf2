//! Outbound contracts for tile execution.
//!
//! The runtime never inspects tile outputs; back-ends and transports return
//! opaque JSON values that are aggregated in tile order.

use async_trait::async_trait;
use serde_json::json;

use aevrt_core::{Node, Tile, TilePayload};

/// Opaque per-tile output.
pub type TileOutput = serde_json::Value;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("back-end failed: {0}")]
    Failed(String),
    #[error("node {node_id} unreachable: {reason}")]
    Unreachable { node_id: String, reason: String },
}

/// Local inference back-end (language, image, audio model callers).
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn execute(&self, tile: &Tile) -> Result<TileOutput, BackendError>;

    fn name(&self) -> &str;
}

/// Transport that ships a tile to a remote AevIP node.
#[async_trait]
pub trait NodeTransport: Send + Sync {
    async fn dispatch(&self, node: &Node, tile: &Tile) -> Result<TileOutput, BackendError>;
}

/// Back-end that reflects the tile payload back as its output.
///
/// Used by the worker binary when no model caller is wired in.
#[derive(Debug, Default, Clone)]
pub struct EchoBackend;

#[async_trait]
impl InferenceBackend for EchoBackend {
    async fn execute(&self, tile: &Tile) -> Result<TileOutput, BackendError> {
        let body = match &tile.payload {
            TilePayload::Text { text } => json!({ "text": text }),
            TilePayload::Image { prompt, count } => json!({ "prompt": prompt, "images": count }),
            TilePayload::Audio { prompt, offset_ms, duration_ms } => {
                json!({ "prompt": prompt, "offset_ms": offset_ms, "duration_ms": duration_ms })
            }
            TilePayload::Embedding { inputs } => json!({ "embedded": inputs.len() }),
        };
        Ok(json!({ "tile_index": tile.tile_index, "output": body }))
    }

    fn name(&self) -> &str {
        "echo"
    }
}

/// Transport for deployments without a mesh: every dispatch fails, so the
/// executor falls back to local execution.
#[derive(Debug, Default, Clone)]
pub struct DisconnectedTransport;

#[async_trait]
impl NodeTransport for DisconnectedTransport {
    async fn dispatch(&self, node: &Node, _tile: &Tile) -> Result<TileOutput, BackendError> {
        Err(BackendError::Unreachable {
            node_id: node.node_id.clone(),
            reason: "no transport configured".into(),
        })
    }
}
