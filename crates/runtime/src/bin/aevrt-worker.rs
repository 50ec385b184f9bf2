//! aevrt-worker: hosts an AevRT runtime and drives its periodic jobs.
//!
//! - optimization cycle (analyze, retune, re-rank, prune) every `--interval-secs`
//! - heartbeat sweep every `--sweep-secs`, so stale nodes go offline between cycles
//!
//! Runs local-only: echo back-end, no remote transport, in-memory storage.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use aevrt_core::config::load_dotenv;
use aevrt_core::{AevError, RuntimeConfig};
use aevrt_runtime::AevRuntime;

// ── CLI ─────────────────────────────────────────────────────────────

/// AevRT worker: periodic tile-size optimization and node health sweeps.
#[derive(Parser, Debug)]
#[command(name = "aevrt-worker", version, about)]
struct Cli {
    /// Path to a TOML config file. Environment variables are used when omitted.
    #[arg(long, env = "AEVRT_CONFIG")]
    config: Option<String>,

    /// Seconds between optimization cycles (overrides the config value).
    #[arg(long, env = "AEVRT_WORKER_INTERVAL_SECS")]
    interval_secs: Option<u64>,

    /// Seconds between heartbeat sweeps.
    #[arg(long, env = "AEVRT_SWEEP_SECS", default_value_t = 30)]
    sweep_secs: u64,

    /// Run a single optimization cycle, print the report and exit.
    #[arg(long)]
    once: bool,
}

fn load_config(cli: &Cli) -> anyhow::Result<RuntimeConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path))?;
            let config = RuntimeConfig::from_toml_str(&raw)
                .with_context(|| format!("invalid config file {}", path))?;
            info!(path = %path, "loaded config file");
            config
        }
        None => RuntimeConfig::from_env(),
    };
    if let Some(secs) = cli.interval_secs {
        config.optimizer.interval_secs = secs.max(1);
    }
    config.validate()?;
    Ok(config)
}

async fn optimize(runtime: &AevRuntime) {
    match runtime.run_optimization().await {
        Ok(report) if report.tile_size_changed() => {
            info!(
                from = report.previous_tile_size,
                to = report.tile_size,
                samples = report.analysis.samples,
                "tuning updated"
            );
        }
        Ok(_) => {}
        Err(AevError::OptimizationSkipped) => warn!("previous optimization cycle still running"),
        Err(e) => error!(error = %e, "optimization cycle failed"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    config.log_summary();

    let runtime = Arc::new(AevRuntime::standalone(config)?);
    runtime.start().await?;

    if cli.once {
        let report = runtime.run_optimization().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let cycle_period = runtime.config().optimizer.interval();
    let sweep_period = Duration::from_secs(cli.sweep_secs.max(1));
    let mut cycle = interval_at(Instant::now() + cycle_period, cycle_period);
    let mut sweep = interval_at(Instant::now() + sweep_period, sweep_period);
    cycle.set_missed_tick_behavior(MissedTickBehavior::Skip);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        cycle_secs = cycle_period.as_secs(),
        sweep_secs = sweep_period.as_secs(),
        "aevrt-worker starting"
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            _ = cycle.tick() => {
                optimize(&runtime).await;
            }
            _ = sweep.tick() => {
                let demoted = runtime.coordinator().sweep_heartbeats(Utc::now()).await;
                if !demoted.is_empty() {
                    info!(nodes = ?demoted, "stale nodes marked offline");
                }
            }
        }
    }

    let stats = runtime.stats();
    info!(
        submitted = stats.tasks_submitted,
        cycles = stats.optimization_cycles,
        tile_size = stats.tuning.params.tile_size,
        "aevrt-worker exited cleanly"
    );
    Ok(())
}
