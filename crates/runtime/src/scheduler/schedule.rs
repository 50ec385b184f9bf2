use std::sync::Arc;

use aevrt_core::{Schedule, ScheduleOptions, Task, TaskType, Tile, TuningSnapshot};

/// Latency target for a schedule: the larger of the caller's budget and the
/// type-dependent floor over the base target.
pub fn target_latency_ms(task_type: TaskType, requested: Option<u64>, base_ms: u64) -> u64 {
    let floor = base_ms.saturating_mul(task_type.latency_multiplier());
    requested.unwrap_or(0).max(floor)
}

pub(super) fn build(
    task: &Task,
    tiles: Vec<Tile>,
    options: &ScheduleOptions,
    tuning: Arc<TuningSnapshot>,
) -> Schedule {
    let params = &tuning.params;
    let task_type = task.task_type();
    let node_hints = vec![None; tiles.len()];

    Schedule {
        task_id: task.id,
        task_type,
        priority: task.priority,
        task_fingerprint: task.fingerprint(),
        target_latency_ms: target_latency_ms(task_type, options.target_latency_ms, params.max_latency_ms),
        prefetch_enabled: options.prefetch.unwrap_or(params.enable_prefetch),
        distribution_enabled: options.distribute.unwrap_or(params.enable_aevip),
        node_hints,
        tiles,
        tuning,
    }
}

#[cfg(test)]
mod tests {
    use aevrt_core::{TaskInput, TuningHandle, TuningParameters};

    use super::*;

    #[test]
    fn media_gets_latency_multiplier() {
        assert_eq!(target_latency_ms(TaskType::Language, None, 100), 100);
        assert_eq!(target_latency_ms(TaskType::Image, None, 100), 500);
        assert_eq!(target_latency_ms(TaskType::Music, Some(200), 100), 500);
        assert_eq!(target_latency_ms(TaskType::Language, Some(250), 100), 250);
        assert_eq!(target_latency_ms(TaskType::Reasoning, Some(50), 100), 200);
    }

    #[test]
    fn options_override_tuning_flags() {
        let tuning = TuningHandle::new(TuningParameters::default());
        let task = Task::new(TaskInput::Language { text: "hello".into() });
        let tiles = Vec::new();
        let options = ScheduleOptions { distribute: Some(false), prefetch: None, target_latency_ms: None };

        let schedule = build(&task, tiles, &options, tuning.current());
        assert!(!schedule.distribution_enabled);
        assert!(schedule.prefetch_enabled);
        assert_eq!(schedule.target_latency_ms, 100);
        assert_eq!(schedule.task_fingerprint, task.fingerprint());
    }
}
