//! Projects service
//!
//! Statuses (kanban columns) and projects (cards) for one user. List
//! queries go through the query cache; every mutation invalidates the
//! affected keys.

use crate::cache::QueryCache;
use crate::config::{DEFAULT_STATUSES, DEFAULT_STATUS_COLOR};
use crate::database::{
    CreateProjectRequest, Project, Repository, SortUpdate, Status, UpdateProjectRequest,
};
use crate::error::{AppError, Result};
use crate::kanban::{BoardSnapshot, BoardStore, MovePlan};
use async_trait::async_trait;
use std::time::Duration;

fn statuses_key(user_id: &str) -> String {
    format!("statuses:{}", user_id)
}

fn projects_key(user_id: &str) -> String {
    format!("projects:{}", user_id)
}

/// Accepts `#RGB` and `#RRGGBB`
fn validate_color(color: &str) -> Result<()> {
    let hex = color.strip_prefix('#').unwrap_or("");
    if (hex.len() == 3 || hex.len() == 6) && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(AppError::Validation(format!("invalid color: {}", color)))
    }
}

fn validate_name(kind: &str, name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!("{} name must not be empty", kind)));
    }
    Ok(trimmed.to_string())
}

/// Service for statuses and projects
#[derive(Clone)]
pub struct ProjectsService {
    repo: Repository,
    cache: QueryCache,
    cache_ttl: Duration,
}

impl ProjectsService {
    pub fn new(repo: Repository, cache: QueryCache, cache_ttl: Duration) -> Self {
        Self {
            repo,
            cache,
            cache_ttl,
        }
    }

    // ===== Statuses =====

    pub async fn list_statuses(&self, user_id: &str) -> Result<Vec<Status>> {
        let repo = &self.repo;
        self.cache
            .get(
                &statuses_key(user_id),
                || repo.list_statuses(user_id),
                self.cache_ttl,
            )
            .await
    }

    /// Create a status at the end of the board
    pub async fn create_status(&self, user_id: &str, name: &str, color: Option<&str>) -> Result<Status> {
        let name = validate_name("Status", name)?;
        let color = color.unwrap_or(DEFAULT_STATUS_COLOR);
        validate_color(color)?;

        tracing::info!("Creating status: {}", name);

        let status = self.repo.create_status(user_id, &name, color).await?;
        self.cache.invalidate(&statuses_key(user_id));

        Ok(status)
    }

    pub async fn update_status(
        &self,
        user_id: &str,
        id: &str,
        name: Option<&str>,
        color: Option<&str>,
    ) -> Result<Status> {
        let name = name.map(|n| validate_name("Status", n)).transpose()?;
        if let Some(color) = color {
            validate_color(color)?;
        }

        let status = self
            .repo
            .update_status(user_id, id, name.as_deref(), color)
            .await?;
        self.cache.invalidate(&statuses_key(user_id));

        tracing::debug!("Status updated: {}", id);
        Ok(status)
    }

    /// Delete a status. Fails while any project still uses it.
    pub async fn delete_status(&self, user_id: &str, id: &str) -> Result<()> {
        tracing::info!("Deleting status: {}", id);

        self.repo.delete_status(user_id, id).await?;
        self.cache.invalidate(&statuses_key(user_id));

        Ok(())
    }

    pub async fn reorder_statuses(&self, user_id: &str, updates: &[SortUpdate]) -> Result<()> {
        let result = self.repo.update_status_orders(user_id, updates).await;
        self.cache.invalidate(&statuses_key(user_id));
        result
    }

    /// Provision the default columns for a user who has none.
    ///
    /// Returns the statuses that were created.
    pub async fn ensure_default_statuses(&self, user_id: &str) -> Result<Vec<Status>> {
        if !self.repo.list_statuses(user_id).await?.is_empty() {
            return Ok(Vec::new());
        }

        tracing::info!("Provisioning default statuses for user {}", user_id);

        let created = self.repo.insert_statuses(user_id, DEFAULT_STATUSES).await?;
        self.cache.invalidate(&statuses_key(user_id));

        Ok(created)
    }

    // ===== Projects =====

    pub async fn list_projects(&self, user_id: &str) -> Result<Vec<Project>> {
        let repo = &self.repo;
        self.cache
            .get(
                &projects_key(user_id),
                || repo.list_projects(user_id),
                self.cache_ttl,
            )
            .await
    }

    pub async fn get_project(&self, user_id: &str, id: &str) -> Result<Project> {
        self.repo.get_project(user_id, id).await
    }

    /// Create a project at the end of its column
    pub async fn create_project(&self, user_id: &str, mut req: CreateProjectRequest) -> Result<Project> {
        req.name = validate_name("Project", &req.name)?;

        tracing::info!("Creating project: {}", req.name);

        let project = self.repo.create_project(user_id, req).await?;
        self.cache.invalidate(&projects_key(user_id));

        tracing::info!("Project created successfully: {}", project.id);
        Ok(project)
    }

    pub async fn update_project(
        &self,
        user_id: &str,
        id: &str,
        mut req: UpdateProjectRequest,
    ) -> Result<Project> {
        req.name = req.name.map(|n| validate_name("Project", &n)).transpose()?;

        let project = self.repo.update_project(user_id, id, req).await?;
        self.cache.invalidate(&projects_key(user_id));

        tracing::debug!("Project updated: {}", id);
        Ok(project)
    }

    /// Persist a card move. The cache is invalidated even when the move
    /// fails so the next load reads the store.
    pub async fn move_project(&self, user_id: &str, plan: &MovePlan) -> Result<()> {
        let result = self
            .repo
            .move_project(
                user_id,
                &plan.project_id,
                &plan.to_status,
                plan.sort_order,
                &plan.displaced,
            )
            .await;
        self.cache.invalidate(&projects_key(user_id));
        result
    }

    pub async fn reorder_projects(&self, user_id: &str, updates: &[SortUpdate]) -> Result<()> {
        let result = self.repo.update_project_orders(user_id, updates).await;
        self.cache.invalidate(&projects_key(user_id));
        result
    }

    /// Delete a project and its tasks. Returns the number of tasks removed.
    pub async fn delete_project(&self, user_id: &str, id: &str) -> Result<u64> {
        tracing::info!("Deleting project: {}", id);

        let tasks_deleted = self.repo.delete_project(user_id, id).await?;
        self.cache.invalidate(&projects_key(user_id));

        tracing::info!("Project {} deleted with {} task(s)", id, tasks_deleted);
        Ok(tasks_deleted)
    }
}

#[async_trait]
impl BoardStore for ProjectsService {
    async fn load_board(&self, user_id: &str, fresh: bool) -> Result<BoardSnapshot> {
        if fresh {
            self.cache.invalidate(&statuses_key(user_id));
            self.cache.invalidate(&projects_key(user_id));
        }

        Ok(BoardSnapshot {
            statuses: self.list_statuses(user_id).await?,
            projects: self.list_projects(user_id).await?,
        })
    }

    async fn apply_move(&self, user_id: &str, plan: &MovePlan) -> Result<()> {
        self.move_project(user_id, plan).await
    }

    async fn reorder_projects(&self, user_id: &str, updates: &[SortUpdate]) -> Result<()> {
        ProjectsService::reorder_projects(self, user_id, updates).await
    }

    async fn reorder_statuses(&self, user_id: &str, updates: &[SortUpdate]) -> Result<()> {
        ProjectsService::reorder_statuses(self, user_id, updates).await
    }
}
