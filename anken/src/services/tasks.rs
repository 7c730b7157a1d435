//! Tasks service
//!
//! Task lifecycle for a project: hierarchy, completion toggling and
//! re-parenting.

use crate::config::MAX_PROGRESS_PERCENTAGE;
use crate::database::{CreateTaskRequest, Repository, SortUpdate, Task, UpdateTaskRequest};
use crate::error::{AppError, Result};
use crate::tasks::{completion_update, TaskForest};

fn validate_progress(progress: Option<i64>) -> Result<()> {
    match progress {
        Some(p) if !(0..=MAX_PROGRESS_PERCENTAGE).contains(&p) => Err(AppError::Validation(format!(
            "progress must be between 0 and {}, got {}",
            MAX_PROGRESS_PERCENTAGE, p
        ))),
        _ => Ok(()),
    }
}

fn validate_hours(hours: Option<f64>) -> Result<()> {
    match hours {
        Some(h) if !h.is_finite() || h < 0.0 => Err(AppError::Validation(format!(
            "hours must be a non-negative number, got {}",
            h
        ))),
        _ => Ok(()),
    }
}

/// Service for managing tasks
#[derive(Clone)]
pub struct TasksService {
    repo: Repository,
}

impl TasksService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    pub async fn list_tasks(&self, user_id: &str, project_id: &str) -> Result<Vec<Task>> {
        self.repo.list_tasks(user_id, project_id).await
    }

    /// A project's tasks as a validated forest
    pub async fn task_tree(&self, user_id: &str, project_id: &str) -> Result<TaskForest> {
        let tasks = self.repo.list_tasks(user_id, project_id).await?;
        TaskForest::build(tasks)
    }

    pub async fn get_task(&self, user_id: &str, id: &str) -> Result<Task> {
        self.repo.get_task(user_id, id).await
    }

    pub async fn create_task(&self, user_id: &str, mut req: CreateTaskRequest) -> Result<Task> {
        req.title = req.title.trim().to_string();
        if req.title.is_empty() {
            return Err(AppError::Validation("Task title must not be empty".to_string()));
        }
        validate_progress(req.progress_percentage)?;
        validate_hours(req.estimated_hours)?;
        validate_hours(req.actual_hours)?;

        tracing::info!("Creating task: {}", req.title);

        let task = self.repo.create_task(user_id, req).await?;

        tracing::info!("Task created successfully: {}", task.id);
        Ok(task)
    }

    pub async fn update_task(&self, user_id: &str, id: &str, req: UpdateTaskRequest) -> Result<Task> {
        if let Some(title) = &req.title {
            if title.trim().is_empty() {
                return Err(AppError::Validation("Task title must not be empty".to_string()));
            }
        }
        validate_progress(req.progress_percentage)?;
        validate_hours(req.estimated_hours.flatten())?;
        validate_hours(req.actual_hours.flatten())?;

        tracing::debug!("Updating task: {}", id);
        self.repo.update_task(user_id, id, req).await
    }

    /// Check or uncheck a task, keeping status and progress in step
    pub async fn toggle_completion(&self, user_id: &str, id: &str, completed: bool) -> Result<Task> {
        let task = self.repo.get_task(user_id, id).await?;
        let update = completion_update(&task, completed);

        tracing::info!(
            "Setting task {} completed={} (status {:?} -> {:?})",
            id,
            completed,
            task.status,
            update.status
        );

        self.repo.update_task(user_id, id, update).await
    }

    /// Re-parent a task and set its position among its new siblings
    pub async fn move_task(
        &self,
        user_id: &str,
        id: &str,
        parent_task_id: Option<&str>,
        sort_order: i64,
    ) -> Result<Task> {
        tracing::debug!("Moving task {} under {:?}", id, parent_task_id);
        self.repo.move_task(user_id, id, parent_task_id, sort_order).await
    }

    pub async fn reorder_tasks(&self, user_id: &str, updates: &[SortUpdate]) -> Result<()> {
        self.repo.update_task_orders(user_id, updates).await
    }

    /// Delete a task with its subtasks. Returns the number of rows removed.
    pub async fn delete_task(&self, user_id: &str, id: &str) -> Result<u64> {
        tracing::info!("Deleting task: {}", id);

        let deleted = self.repo.delete_task(user_id, id).await?;

        tracing::info!("Task {} deleted ({} including subtasks)", id, deleted);
        Ok(deleted)
    }
}
