//! Tile Scheduler: decomposes tasks into tiles and annotates them with the
//! directives the executor needs.
//!
//! Split into focused submodules:
//! - `decompose`: pure, type-aware splitting of a task's input
//! - `schedule`: latency targets and routing flags for a set of tiles
//!
//! Node selection is deliberately absent here; node health can change
//! between scheduling and dispatch, so the executor asks the coordinator at
//! dispatch time.

mod decompose;
mod schedule;

use aevrt_core::config::SchedulerConfig;
use aevrt_core::{AevError, Schedule, ScheduleOptions, Task, Tile, TuningHandle};
use tracing::debug;

pub use self::decompose::decompose;
pub use self::schedule::target_latency_ms;

pub struct TileScheduler {
    tuning: TuningHandle,
    config: SchedulerConfig,
}

impl TileScheduler {
    pub fn new(tuning: TuningHandle, config: SchedulerConfig) -> Self {
        Self { tuning, config }
    }

    /// Decompose `task` using the current tile size.
    pub fn decompose_task(&self, task: &Task) -> Result<Vec<Tile>, AevError> {
        let snapshot = self.tuning.current();
        decompose(task, snapshot.params.tile_size, self.config.music_segment_ms)
    }

    /// Build a schedule for already-decomposed tiles against the current
    /// tuning snapshot.
    pub fn create_schedule(&self, task: &Task, tiles: Vec<Tile>, options: &ScheduleOptions) -> Schedule {
        schedule::build(task, tiles, options, self.tuning.current())
    }

    /// Decompose and schedule against a single tuning snapshot, so a
    /// concurrent optimizer update cannot split one request across versions.
    pub fn schedule_task(&self, task: &Task) -> Result<Schedule, AevError> {
        let snapshot = self.tuning.current();
        let tiles = decompose(task, snapshot.params.tile_size, self.config.music_segment_ms)?;
        let options = ScheduleOptions::from(&task.constraints);
        let schedule = schedule::build(task, tiles, &options, snapshot);
        debug!(
            task_id = %task.id,
            task_type = %task.task_type(),
            tiles = schedule.tile_count(),
            target_latency_ms = schedule.target_latency_ms,
            distribution = schedule.distribution_enabled,
            tuning_version = schedule.tuning.version,
            "task scheduled"
        );
        Ok(schedule)
    }

    pub fn tuning(&self) -> &TuningHandle {
        &self.tuning
    }
}

#[cfg(test)]
mod tests {
    use aevrt_core::{TaskInput, TaskType, TuningParameters};

    use super::*;

    fn scheduler() -> TileScheduler {
        TileScheduler::new(TuningHandle::default(), SchedulerConfig::default())
    }

    #[test]
    fn decompose_follows_tuning_updates() {
        let s = scheduler();
        let task = Task::new(TaskInput::Language { text: "x".repeat(1000) });
        assert_eq!(s.decompose_task(&task).unwrap().len(), 4);

        s.tuning().update(|p| p.tile_size = 500);
        assert_eq!(s.decompose_task(&task).unwrap().len(), 2);
    }

    #[test]
    fn schedule_task_records_snapshot_version() {
        let s = scheduler();
        s.tuning().update(|p| p.tile_size = 100);
        let task = Task::new(TaskInput::Language { text: "x".repeat(250) });
        let schedule = s.schedule_task(&task).unwrap();
        assert_eq!(schedule.tuning.version, 2);
        assert_eq!(schedule.tile_count(), 3);
        assert_eq!(schedule.node_hints, vec![None, None, None]);
        assert_eq!(schedule.task_type, TaskType::Language);
    }

    #[test]
    fn create_schedule_applies_caller_options() {
        let s = scheduler();
        let task = Task::new(TaskInput::Music { prompt: "lofi".into(), duration_ms: 25_000 });
        let tiles = s.decompose_task(&task).unwrap();
        assert_eq!(tiles.len(), 3);

        let options = ScheduleOptions {
            distribute: None,
            prefetch: None,
            target_latency_ms: Some(50),
        };
        let schedule = s.create_schedule(&task, tiles, &options);
        assert_eq!(schedule.target_latency_ms, 500);
        assert_eq!(schedule.tile_count(), 3);
        assert_eq!(schedule.task_type, TaskType::Music);
        assert_eq!(schedule.tuning.version, 1);
    }

    #[test]
    fn image_schedule_with_aevip_enabled() {
        let s = TileScheduler::new(
            TuningHandle::new(TuningParameters { enable_aevip: true, ..Default::default() }),
            SchedulerConfig::default(),
        );
        let task = Task::new(TaskInput::Image { prompt: "fox".into(), count: 3 });
        let schedule = s.schedule_task(&task).unwrap();
        assert_eq!(schedule.tile_count(), 3);
        assert!(schedule.distribution_enabled);
        assert!(schedule.routes_remotely());
    }
}
