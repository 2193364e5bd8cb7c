//! Stage and pipeline aggregates derived from task status.

use crate::api::{Stage, StageStatus, Task};

/// Derived status of `stage` given all tasks of its pipeline.
pub fn stage_status(stage: &Stage, tasks: &[Task]) -> StageStatus {
    StageStatus::derive(
        tasks
            .iter()
            .filter(|t| t.stage_id == stage.id)
            .map(|t| t.status),
    )
}

/// The lowest-position stage that is not yet done.
///
/// Only this stage may have tasks dispatched. `stages` must be ordered by
/// position.
pub fn active_stage<'a>(stages: &'a [Stage], tasks: &[Task]) -> Option<&'a Stage> {
    stages
        .iter()
        .find(|stage| stage_status(stage, tasks) != StageStatus::Done)
}

/// A pipeline is done once it has stages and every one of them is done.
pub fn pipeline_done(stages: &[Stage], tasks: &[Task]) -> bool {
    !stages.is_empty() && active_stage(stages, tasks).is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{TaskStatus, TaskType};

    fn stage(id: i64, position: i64) -> Stage {
        Stage {
            id,
            creator_id: 1,
            created_ts: 0,
            updater_id: 1,
            updated_ts: 0,
            pipeline_id: 1,
            position,
            name: format!("stage-{position}"),
        }
    }

    fn task(id: i64, stage_id: i64, status: TaskStatus) -> Task {
        Task {
            id,
            creator_id: 1,
            created_ts: 0,
            updater_id: 1,
            updated_ts: 0,
            pipeline_id: 1,
            stage_id,
            instance_id: 1,
            database_id: None,
            name: format!("task-{id}"),
            status,
            task_type: TaskType::General,
            payload: "{}".into(),
        }
    }

    #[test]
    fn test_active_stage_is_first_unfinished() {
        let stages = vec![stage(10, 1), stage(20, 2), stage(30, 3)];
        let tasks = vec![
            task(1, 10, TaskStatus::Done),
            task(2, 20, TaskStatus::Pending),
            task(3, 30, TaskStatus::Pending),
        ];
        assert_eq!(active_stage(&stages, &tasks).map(|s| s.id), Some(20));
        assert!(!pipeline_done(&stages, &tasks));
    }

    #[test]
    fn test_failed_task_holds_the_barrier() {
        let stages = vec![stage(10, 1), stage(20, 2)];
        let tasks = vec![
            task(1, 10, TaskStatus::Failed),
            task(2, 10, TaskStatus::Done),
            task(3, 20, TaskStatus::Pending),
        ];
        assert_eq!(stage_status(&stages[0], &tasks), StageStatus::Failed);
        assert_eq!(active_stage(&stages, &tasks).map(|s| s.id), Some(10));
    }

    #[test]
    fn test_pipeline_done() {
        let stages = vec![stage(10, 1), stage(20, 2)];
        let tasks = vec![task(1, 10, TaskStatus::Done), task(2, 20, TaskStatus::Done)];
        assert!(pipeline_done(&stages, &tasks));

        // Empty stages count as done, but an empty pipeline stays open.
        assert!(pipeline_done(&stages, &[]));
        assert!(!pipeline_done(&[], &[]));
    }
}
