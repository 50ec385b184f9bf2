//! Process-wide tuning parameters.
//!
//! Readers load the current [`TuningSnapshot`] once per decision; the
//! optimizer publishes a new snapshot with a bumped version. Swaps are atomic,
//! so no reader ever observes a half-applied update.

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningParameters {
    pub tile_size: usize,
    pub max_latency_ms: u64,
    pub enable_prefetch: bool,
    pub enable_aevip: bool,
    pub enable_caching: bool,
}

impl Default for TuningParameters {
    fn default() -> Self {
        Self {
            tile_size: 256,
            max_latency_ms: 100,
            enable_prefetch: true,
            enable_aevip: true,
            enable_caching: true,
        }
    }
}

/// Versioned, immutable view of the tuning parameters.
#[derive(Debug, Clone, Serialize)]
pub struct TuningSnapshot {
    pub version: u64,
    pub params: TuningParameters,
    pub updated_at: DateTime<Utc>,
}

/// Shared handle to the current tuning snapshot.
#[derive(Debug, Clone)]
pub struct TuningHandle {
    inner: Arc<ArcSwap<TuningSnapshot>>,
}

impl TuningHandle {
    pub fn new(params: TuningParameters) -> Self {
        let snapshot = TuningSnapshot {
            version: 1,
            params,
            updated_at: Utc::now(),
        };
        Self {
            inner: Arc::new(ArcSwap::from_pointee(snapshot)),
        }
    }

    /// Current snapshot. Cheap; hold it for the duration of one decision.
    pub fn current(&self) -> Arc<TuningSnapshot> {
        self.inner.load_full()
    }

    /// Apply `f` to a copy of the current parameters and publish the result.
    ///
    /// Concurrent updates are serialized by `rcu`; each one bumps the version.
    pub fn update<F>(&self, f: F) -> Arc<TuningSnapshot>
    where
        F: Fn(&mut TuningParameters),
    {
        self.inner.rcu(|current| {
            let mut params = current.params.clone();
            f(&mut params);
            Arc::new(TuningSnapshot {
                version: current.version + 1,
                params,
                updated_at: Utc::now(),
            })
        });
        self.current()
    }
}

impl Default for TuningHandle {
    fn default() -> Self {
        Self::new(TuningParameters::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_bumps_version() {
        let handle = TuningHandle::default();
        let before = handle.current();
        assert_eq!(before.version, 1);

        let after = handle.update(|p| p.tile_size = 128);
        assert_eq!(after.version, 2);
        assert_eq!(after.params.tile_size, 128);

        // Old snapshot is untouched.
        assert_eq!(before.params.tile_size, 256);
    }

    #[test]
    fn clones_share_state() {
        let handle = TuningHandle::default();
        let other = handle.clone();
        handle.update(|p| p.enable_aevip = false);
        assert!(!other.current().params.enable_aevip);
    }
}
