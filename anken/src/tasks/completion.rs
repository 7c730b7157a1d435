//! Keeps a task's completion flag, status and progress in step

use crate::config::MAX_PROGRESS_PERCENTAGE;
use crate::database::{Task, TaskStatus, UpdateTaskRequest};

/// Update to apply when a task's completion checkbox is toggled.
///
/// Completing sets `done` and full progress. Reopening a `done` task sends
/// it back to `todo`; any other status is kept. Progress is left as is
/// when reopening.
pub fn completion_update(task: &Task, completed: bool) -> UpdateTaskRequest {
    let status = if completed {
        TaskStatus::Done
    } else if task.status == TaskStatus::Done {
        TaskStatus::Todo
    } else {
        task.status
    };

    UpdateTaskRequest {
        is_completed: Some(completed),
        status: Some(status),
        progress_percentage: completed.then_some(MAX_PROGRESS_PERCENTAGE),
        ..Default::default()
    }
}

/// Whether a task should render as finished
pub fn is_finished(task: &Task) -> bool {
    task.is_completed || task.status == TaskStatus::Done
}
