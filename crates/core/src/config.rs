use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AevError;
use crate::tuning::TuningParameters;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key).as_deref() {
        Some("1") | Some("true") | Some("yes") | Some("on") => true,
        Some("0") | Some("false") | Some("no") | Some("off") => false,
        _ => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

/// Runtime configuration, read from the environment or a TOML file.
///
/// Every section can be omitted from TOML; missing keys take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Active profile name (empty = default).
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub tuning: TuningConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
}

impl RuntimeConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `AEVRT_PROFILE`. When set (e.g. `PROD`), every key
    /// is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("AEVRT_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            tuning: TuningConfig::from_env_profiled(p),
            scheduler: SchedulerConfig::from_env_profiled(p),
            coordinator: CoordinatorConfig::from_env_profiled(p),
            metrics: MetricsConfig::from_env_profiled(p),
            optimizer: OptimizerConfig::from_env_profiled(p),
        }
    }

    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, AevError> {
        let config: Self = toml::from_str(raw).map_err(|e| AevError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the optimizer and scheduler cannot work with.
    pub fn validate(&self) -> Result<(), AevError> {
        let o = &self.optimizer;
        if o.tile_size_floor == 0 {
            return Err(AevError::Config("tile_size_floor must be at least 1".into()));
        }
        if o.tile_size_floor > o.tile_size_ceiling {
            return Err(AevError::Config(format!(
                "tile_size_floor ({}) exceeds tile_size_ceiling ({})",
                o.tile_size_floor, o.tile_size_ceiling
            )));
        }
        if o.max_step_ratio < 1.0 {
            return Err(AevError::Config("max_step_ratio must be >= 1.0".into()));
        }
        if !(0.0..1.0).contains(&o.low_watermark) {
            return Err(AevError::Config("low_watermark must be in [0, 1)".into()));
        }
        if self.tuning.tile_size == 0 {
            return Err(AevError::Config("tile_size must be at least 1".into()));
        }
        if self.scheduler.max_in_flight == 0 {
            return Err(AevError::Config("max_in_flight must be at least 1".into()));
        }
        if self.scheduler.music_segment_ms == 0 {
            return Err(AevError::Config("music_segment_ms must be at least 1".into()));
        }
        if self.coordinator.heartbeat_timeout_secs > MAX_HEARTBEAT_TIMEOUT_SECS {
            return Err(AevError::Config(format!(
                "heartbeat_timeout_secs must be at most {}",
                MAX_HEARTBEAT_TIMEOUT_SECS
            )));
        }
        if o.analysis_window_minutes > MAX_ANALYSIS_WINDOW_MINUTES {
            return Err(AevError::Config(format!(
                "analysis_window_minutes must be at most {}",
                MAX_ANALYSIS_WINDOW_MINUTES
            )));
        }
        Ok(())
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  tuning:      tile_size={}, max_latency_ms={}, aevip={}, prefetch={}, caching={}",
            self.tuning.tile_size,
            self.tuning.max_latency_ms,
            self.tuning.enable_aevip,
            self.tuning.enable_prefetch,
            self.tuning.enable_caching
        );
        tracing::info!(
            "  scheduler:   max_in_flight={}, music_segment_ms={}",
            self.scheduler.max_in_flight,
            self.scheduler.music_segment_ms
        );
        tracing::info!(
            "  coordinator: heartbeat_timeout={}s, busy_threshold={:.2}",
            self.coordinator.heartbeat_timeout_secs,
            self.coordinator.busy_load_threshold
        );
        tracing::info!("  metrics:     retention_days={}", self.metrics.retention_days);
        tracing::info!(
            "  optimizer:   interval={}s, tile_size=[{}, {}], window={}m",
            self.optimizer.interval_secs,
            self.optimizer.tile_size_floor,
            self.optimizer.tile_size_ceiling,
            self.optimizer.analysis_window_minutes
        );
    }
}

// ── Tuning defaults ───────────────────────────────────────────

/// Startup values for the process-wide tuning parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningConfig {
    #[serde(default = "default_tile_size")]
    pub tile_size: usize,
    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: u64,
    #[serde(default = "default_true")]
    pub enable_aevip: bool,
    #[serde(default = "default_true")]
    pub enable_prefetch: bool,
    #[serde(default = "default_true")]
    pub enable_caching: bool,
}

fn default_tile_size() -> usize { 256 }
fn default_max_latency_ms() -> u64 { 100 }
fn default_true() -> bool { true }

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            tile_size: default_tile_size(),
            max_latency_ms: default_max_latency_ms(),
            enable_aevip: true,
            enable_prefetch: true,
            enable_caching: true,
        }
    }
}

impl TuningConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            tile_size: profiled_env_parse(p, "AEVRT_TILE_SIZE", default_tile_size()),
            max_latency_ms: profiled_env_parse(p, "AEVRT_MAX_LATENCY_MS", default_max_latency_ms()),
            enable_aevip: profiled_env_bool(p, "AEVRT_ENABLE_AEVIP", true),
            enable_prefetch: profiled_env_bool(p, "AEVRT_ENABLE_PREFETCH", true),
            enable_caching: profiled_env_bool(p, "AEVRT_ENABLE_CACHING", true),
        }
    }

    /// Initial tuning parameters derived from this config.
    pub fn initial_parameters(&self) -> TuningParameters {
        TuningParameters {
            tile_size: self.tile_size,
            max_latency_ms: self.max_latency_ms,
            enable_prefetch: self.enable_prefetch,
            enable_aevip: self.enable_aevip,
            enable_caching: self.enable_caching,
        }
    }
}

// ── Scheduler / executor ──────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Default audio segment length when the task does not override it.
    #[serde(default = "default_music_segment_ms")]
    pub music_segment_ms: u64,
    /// Maximum concurrent tile dispatches per schedule.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_music_segment_ms() -> u64 { 10_000 }
fn default_max_in_flight() -> usize { 8 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            music_segment_ms: default_music_segment_ms(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl SchedulerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            music_segment_ms: profiled_env_parse(p, "AEVRT_MUSIC_SEGMENT_MS", default_music_segment_ms()),
            max_in_flight: profiled_env_parse(p, "AEVRT_MAX_IN_FLIGHT", default_max_in_flight()),
        }
    }
}

// ── AevIP coordinator ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Seconds without a heartbeat before a node is marked offline.
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,
    /// Load at or above which a node reports as busy.
    #[serde(default = "default_busy_threshold")]
    pub busy_load_threshold: f64,
    /// Smoothing factor for rolling latency / success statistics.
    #[serde(default = "default_ema_alpha")]
    pub ema_alpha: f64,
}

/// One day.
pub const MAX_HEARTBEAT_TIMEOUT_SECS: u64 = 86_400;

fn default_heartbeat_timeout() -> u64 { 90 }
fn default_busy_threshold() -> f64 { 0.85 }
fn default_ema_alpha() -> f64 { 0.2 }

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            busy_load_threshold: default_busy_threshold(),
            ema_alpha: default_ema_alpha(),
        }
    }
}

impl CoordinatorConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            heartbeat_timeout_secs: profiled_env_parse(p, "AEVRT_HEARTBEAT_TIMEOUT_SECS", default_heartbeat_timeout()),
            busy_load_threshold: profiled_env_parse(p, "AEVRT_BUSY_LOAD_THRESHOLD", default_busy_threshold()),
            ema_alpha: profiled_env_parse(p, "AEVRT_EMA_ALPHA", default_ema_alpha()),
        }
    }

    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.heartbeat_timeout_secs.min(MAX_HEARTBEAT_TIMEOUT_SECS) as i64)
    }
}

// ── Metrics ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_retention_days() -> u32 { 30 }

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { retention_days: default_retention_days() }
    }
}

impl MetricsConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            retention_days: profiled_env_parse(p, "AEVRT_METRICS_RETENTION_DAYS", default_retention_days()),
        }
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}

// ── Optimizer ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Seconds between optimization cycles.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// How far back `analyze_performance` looks.
    #[serde(default = "default_window_minutes")]
    pub analysis_window_minutes: u64,
    /// Upper bound on samples considered per cycle.
    #[serde(default = "default_max_samples")]
    pub analysis_max_samples: usize,
    #[serde(default = "default_floor")]
    pub tile_size_floor: usize,
    #[serde(default = "default_ceiling")]
    pub tile_size_ceiling: usize,
    /// Largest multiplicative change per cycle, in either direction.
    #[serde(default = "default_max_step")]
    pub max_step_ratio: f64,
    /// Fraction of `max_latency_ms` below which tiles grow.
    #[serde(default = "default_low_watermark")]
    pub low_watermark: f64,
}

fn default_interval() -> u64 { 3600 }
/// Thirty days.
pub const MAX_ANALYSIS_WINDOW_MINUTES: u64 = 43_200;

fn default_window_minutes() -> u64 { 60 }
fn default_max_samples() -> usize { 1000 }
fn default_floor() -> usize { 32 }
fn default_ceiling() -> usize { 4096 }
fn default_max_step() -> f64 { 2.0 }
fn default_low_watermark() -> f64 { 0.5 }

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            analysis_window_minutes: default_window_minutes(),
            analysis_max_samples: default_max_samples(),
            tile_size_floor: default_floor(),
            tile_size_ceiling: default_ceiling(),
            max_step_ratio: default_max_step(),
            low_watermark: default_low_watermark(),
        }
    }
}

impl OptimizerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            interval_secs: profiled_env_parse(p, "AEVRT_OPTIMIZATION_INTERVAL_SECS", default_interval()),
            analysis_window_minutes: profiled_env_parse(p, "AEVRT_ANALYSIS_WINDOW_MINUTES", default_window_minutes()),
            analysis_max_samples: profiled_env_parse(p, "AEVRT_ANALYSIS_MAX_SAMPLES", default_max_samples()),
            tile_size_floor: profiled_env_parse(p, "AEVRT_TILE_SIZE_FLOOR", default_floor()),
            tile_size_ceiling: profiled_env_parse(p, "AEVRT_TILE_SIZE_CEILING", default_ceiling()),
            max_step_ratio: profiled_env_parse(p, "AEVRT_MAX_STEP_RATIO", default_max_step()),
            low_watermark: profiled_env_parse(p, "AEVRT_LOW_WATERMARK", default_low_watermark()),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn analysis_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.analysis_window_minutes.min(MAX_ANALYSIS_WINDOW_MINUTES) as i64)
    }
}
