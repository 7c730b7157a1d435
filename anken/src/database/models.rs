//! Database models
//!
//! Rust structs representing database entities.
//! All models use serde for serialization to clients.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

/// A kanban column owned by one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Status {
    pub id: String,
    pub user_id: String,
    pub name: String,
    /// Hex color such as `#EF4444`
    pub color: String,
    /// Dense 0-based column position
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A client project, displayed as a kanban card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub memo: Option<String>,
    pub delivery_date: Option<NaiveDate>,
    pub status_id: Option<String>,
    /// Position within the current status; gaps are allowed
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create project request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: Option<String>,
    pub memo: Option<String>,
    pub delivery_date: Option<NaiveDate>,
    pub status_id: Option<String>,
}

/// Partial project update. `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub memo: Option<Option<String>>,
    pub delivery_date: Option<Option<NaiveDate>>,
    pub status_id: Option<Option<String>>,
    pub sort_order: Option<i64>,
}

/// A new sort position for one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortUpdate {
    pub id: String,
    pub sort_order: i64,
}

impl SortUpdate {
    pub fn new(id: impl Into<String>, sort_order: i64) -> Self {
        Self {
            id: id.into(),
            sort_order,
        }
    }
}

/// Workflow state of a task
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Review,
    Blocked,
    Done,
}

/// Task priority level
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

/// A unit of work in a project, optionally nested under a parent task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: String,
    pub project_id: String,
    pub parent_task_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub is_completed: bool,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub due_date: Option<NaiveDate>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    /// 0 to 100
    pub progress_percentage: i64,
    pub tags: Option<Json<Vec<String>>>,
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn tag_list(&self) -> &[String] {
        self.tags.as_ref().map(|t| t.0.as_slice()).unwrap_or(&[])
    }
}

/// Create task request. Unset fields take the task defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateTaskRequest {
    pub project_id: String,
    pub parent_task_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub due_date: Option<NaiveDate>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub progress_percentage: Option<i64>,
    pub tags: Option<Vec<String>>,
}

/// Partial task update. `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub is_completed: Option<bool>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub due_date: Option<Option<NaiveDate>>,
    pub estimated_hours: Option<Option<f64>>,
    pub actual_hours: Option<Option<f64>>,
    pub progress_percentage: Option<i64>,
    pub tags: Option<Option<Vec<String>>>,
}

/// User profile, keyed by the auth user id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
