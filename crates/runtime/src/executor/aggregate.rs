use std::collections::HashMap;

use sha2::{Digest, Sha256};

use aevrt_core::TuningParameters;

use super::TileOutcome;

/// Cache key for a task's result under the given tuning parameters.
///
/// The same content scheduled against the same tile size and latency target
/// always maps to the same key.
pub fn cache_key(task_fingerprint: &str, params: &TuningParameters) -> String {
    let mut hasher = Sha256::new();
    hasher.update(task_fingerprint.as_bytes());
    hasher.update(params.tile_size.to_le_bytes());
    hasher.update(params.max_latency_ms.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

/// Remote node that served the most tiles. Ties go to the node that served
/// the lowest tile index. `None` when every tile ran locally.
///
/// `outputs` must be sorted by `tile_index`.
pub fn optimal_node(outputs: &[TileOutcome]) -> Option<String> {
    // node -> (tiles served, first tile index)
    let mut served: HashMap<&str, (usize, usize)> = HashMap::new();
    for outcome in outputs {
        if let Some(node) = outcome.node_id.as_deref() {
            served
                .entry(node)
                .and_modify(|(count, _)| *count += 1)
                .or_insert((1, outcome.tile_index));
        }
    }
    served
        .into_iter()
        .max_by(|(_, (ca, fa)), (_, (cb, fb))| ca.cmp(cb).then_with(|| fb.cmp(fa)))
        .map(|(node, _)| node.to_string())
}
