//! Repository layer for database operations
//!
//! This module provides owner-scoped CRUD operations for statuses,
//! projects, tasks and profiles. Multi-row changes run in transactions.

use super::models::*;
use crate::config::{MAX_PROGRESS_PERCENTAGE, SORT_STEP};
use crate::error::{AppError, Result};
use chrono::Utc;
use sqlx::types::Json;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

/// Repository for database operations
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ===== Statuses =====

    /// List a user's statuses in column order
    pub async fn list_statuses(&self, user_id: &str) -> Result<Vec<Status>> {
        let statuses = sqlx::query_as::<_, Status>(
            r#"
            SELECT * FROM project_statuses
            WHERE user_id = ?
            ORDER BY sort_order ASC, created_at ASC, id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(statuses)
    }

    /// Get a status by ID
    pub async fn get_status(&self, user_id: &str, id: &str) -> Result<Status> {
        sqlx::query_as::<_, Status>("SELECT * FROM project_statuses WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found("Status", id))
    }

    /// Append a status at the end of the user's columns
    pub async fn create_status(&self, user_id: &str, name: &str, color: &str) -> Result<Status> {
        let mut tx = self.pool.begin().await?;

        let next: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM project_statuses WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        let status = insert_status(&mut tx, user_id, name, color, next).await?;
        tx.commit().await?;

        tracing::debug!("Created status: {} at position {}", status.id, next);
        Ok(status)
    }

    /// Insert a batch of statuses with positions 0..n in one transaction
    pub async fn insert_statuses(
        &self,
        user_id: &str,
        statuses: &[(&str, &str)],
    ) -> Result<Vec<Status>> {
        let mut tx = self.pool.begin().await?;
        let mut created = Vec::with_capacity(statuses.len());

        for (position, (name, color)) in statuses.iter().enumerate() {
            created.push(insert_status(&mut tx, user_id, name, color, position as i64).await?);
        }

        tx.commit().await?;

        tracing::debug!("Inserted {} statuses for user {}", created.len(), user_id);
        Ok(created)
    }

    /// Rename or recolor a status
    pub async fn update_status(
        &self,
        user_id: &str,
        id: &str,
        name: Option<&str>,
        color: Option<&str>,
    ) -> Result<Status> {
        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE project_statuses SET updated_at = ");
        qb.push_bind(Utc::now());

        if let Some(name) = name {
            qb.push(", name = ").push_bind(name.to_string());
        }
        if let Some(color) = color {
            qb.push(", color = ").push_bind(color.to_string());
        }

        qb.push(" WHERE id = ")
            .push_bind(id.to_string())
            .push(" AND user_id = ")
            .push_bind(user_id.to_string());

        let rows = qb.build().execute(&self.pool).await?.rows_affected();
        if rows == 0 {
            return Err(AppError::not_found("Status", id));
        }

        self.get_status(user_id, id).await
    }

    /// Delete a status that no project references.
    ///
    /// The reference check and the delete share one transaction, so a
    /// project moved into the status concurrently cannot slip between them.
    pub async fn delete_status(&self, user_id: &str, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<String> =
            sqlx::query_scalar("SELECT id FROM project_statuses WHERE id = ? AND user_id = ?")
                .bind(id)
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;

        if exists.is_none() {
            return Err(AppError::not_found("Status", id));
        }

        let references: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects WHERE status_id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        if references > 0 {
            return Err(AppError::ConstraintViolation(format!(
                "status {} is used by {} project(s) and cannot be deleted",
                id, references
            )));
        }

        sqlx::query("DELETE FROM project_statuses WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::debug!("Deleted status: {}", id);
        Ok(())
    }

    /// Write new column positions as one batch
    pub async fn update_status_orders(&self, user_id: &str, updates: &[SortUpdate]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        for update in updates {
            let rows = sqlx::query(
                "UPDATE project_statuses SET sort_order = ?, updated_at = ? WHERE id = ? AND user_id = ?",
            )
            .bind(update.sort_order)
            .bind(now)
            .bind(&update.id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if rows == 0 {
                return Err(AppError::not_found("Status", update.id.clone()));
            }
        }

        tx.commit().await?;

        tracing::debug!("Reordered {} statuses", updates.len());
        Ok(())
    }

    // ===== Projects =====

    /// List a user's projects ordered by position
    pub async fn list_projects(&self, user_id: &str) -> Result<Vec<Project>> {
        let projects = sqlx::query_as::<_, Project>(
            r#"
            SELECT * FROM projects
            WHERE user_id = ?
            ORDER BY sort_order ASC, created_at ASC, id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(projects)
    }

    /// Get a project by ID
    pub async fn get_project(&self, user_id: &str, id: &str) -> Result<Project> {
        sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found("Project", id))
    }

    /// Create a project at the end of its column
    pub async fn create_project(&self, user_id: &str, req: CreateProjectRequest) -> Result<Project> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        if let Some(status_id) = &req.status_id {
            ensure_status_owned(&mut tx, user_id, status_id).await?;
        }

        let max: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(sort_order) FROM projects WHERE user_id = ? AND status_id IS ?",
        )
        .bind(user_id)
        .bind(&req.status_id)
        .fetch_one(&mut *tx)
        .await?;
        let sort_order = max.map_or(0, |m| m + SORT_STEP);

        let project = sqlx::query_as::<_, Project>(
            r#"
            INSERT INTO projects
                (id, user_id, name, description, memo, delivery_date, status_id, sort_order, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(user_id)
        .bind(&req.name)
        .bind(&req.description)
        .bind(&req.memo)
        .bind(req.delivery_date)
        .bind(&req.status_id)
        .bind(sort_order)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!("Created project: {} at position {}", id, sort_order);
        Ok(project)
    }

    /// Apply a partial update to a project
    ///
    /// A status change without an explicit `sort_order` appends the card to
    /// the end of its new column.
    pub async fn update_project(
        &self,
        user_id: &str,
        id: &str,
        mut req: UpdateProjectRequest,
    ) -> Result<Project> {
        let mut tx = self.pool.begin().await?;

        if let Some(Some(status_id)) = &req.status_id {
            ensure_status_owned(&mut tx, user_id, status_id).await?;
        }

        if let (Some(status_id), None) = (&req.status_id, req.sort_order) {
            let current: Option<Option<String>> =
                sqlx::query_scalar("SELECT status_id FROM projects WHERE id = ? AND user_id = ?")
                    .bind(id)
                    .bind(user_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            let current = current.ok_or_else(|| AppError::not_found("Project", id))?;

            if current != *status_id {
                let max: Option<i64> = sqlx::query_scalar(
                    "SELECT MAX(sort_order) FROM projects WHERE user_id = ? AND status_id IS ? AND id != ?",
                )
                .bind(user_id)
                .bind(status_id)
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
                req.sort_order = Some(max.map_or(0, |m| m + SORT_STEP));
            }
        }

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE projects SET updated_at = ");
        qb.push_bind(Utc::now());

        if let Some(name) = req.name {
            qb.push(", name = ").push_bind(name);
        }
        if let Some(description) = req.description {
            qb.push(", description = ").push_bind(description);
        }
        if let Some(memo) = req.memo {
            qb.push(", memo = ").push_bind(memo);
        }
        if let Some(delivery_date) = req.delivery_date {
            qb.push(", delivery_date = ").push_bind(delivery_date);
        }
        if let Some(status_id) = req.status_id {
            qb.push(", status_id = ").push_bind(status_id);
        }
        if let Some(sort_order) = req.sort_order {
            qb.push(", sort_order = ").push_bind(sort_order);
        }

        qb.push(" WHERE id = ")
            .push_bind(id.to_string())
            .push(" AND user_id = ")
            .push_bind(user_id.to_string());

        let rows = qb.build().execute(&mut *tx).await?.rows_affected();
        if rows == 0 {
            return Err(AppError::not_found("Project", id));
        }

        tx.commit().await?;

        tracing::debug!("Updated project: {}", id);
        self.get_project(user_id, id).await
    }

    /// Move a project to a status and position (drag and drop).
    ///
    /// Siblings displaced by the move are repositioned in the same
    /// transaction, so a failed move leaves every card where it was.
    pub async fn move_project(
        &self,
        user_id: &str,
        id: &str,
        status_id: &str,
        sort_order: i64,
        displaced: &[SortUpdate],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        ensure_status_owned(&mut tx, user_id, status_id).await?;

        let rows = sqlx::query(
            r#"
            UPDATE projects SET status_id = ?, sort_order = ?, updated_at = ?
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(status_id)
        .bind(sort_order)
        .bind(now)
        .bind(id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(AppError::not_found("Project", id));
        }

        write_project_orders(&mut tx, user_id, displaced).await?;
        tx.commit().await?;

        tracing::debug!(
            "Moved project {} to status {} at {} ({} displaced)",
            id,
            status_id,
            sort_order,
            displaced.len()
        );
        Ok(())
    }

    /// Write new card positions as one batch
    pub async fn update_project_orders(&self, user_id: &str, updates: &[SortUpdate]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        write_project_orders(&mut tx, user_id, updates).await?;
        tx.commit().await?;

        tracing::debug!("Reordered {} projects", updates.len());
        Ok(())
    }

    /// Delete a project together with all of its tasks
    pub async fn delete_project(&self, user_id: &str, id: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<String> =
            sqlx::query_scalar("SELECT id FROM projects WHERE id = ? AND user_id = ?")
                .bind(id)
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;

        if exists.is_none() {
            return Err(AppError::not_found("Project", id));
        }

        let tasks_deleted = sqlx::query("DELETE FROM tasks WHERE project_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::debug!("Deleted project {} and {} task(s)", id, tasks_deleted);
        Ok(tasks_deleted)
    }

    // ===== Tasks =====

    /// List a project's tasks ordered by position
    pub async fn list_tasks(&self, user_id: &str, project_id: &str) -> Result<Vec<Task>> {
        self.get_project(user_id, project_id).await?;

        let tasks = sqlx::query_as::<_, Task>(
            r#"
            SELECT * FROM tasks
            WHERE project_id = ?
            ORDER BY sort_order ASC, created_at ASC, id ASC
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(tasks)
    }

    /// Get a task by ID
    pub async fn get_task(&self, user_id: &str, id: &str) -> Result<Task> {
        let mut conn = self.pool.acquire().await?;
        fetch_owned_task(&mut conn, user_id, id).await
    }

    /// Create a task at the end of its sibling group
    pub async fn create_task(&self, user_id: &str, req: CreateTaskRequest) -> Result<Task> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let owner: Option<String> = sqlx::query_scalar("SELECT user_id FROM projects WHERE id = ?")
            .bind(&req.project_id)
            .fetch_optional(&mut *tx)
            .await?;
        if owner.as_deref() != Some(user_id) {
            return Err(AppError::not_found("Project", req.project_id.clone()));
        }

        if let Some(parent_id) = &req.parent_task_id {
            let parent = fetch_owned_task(&mut tx, user_id, parent_id).await?;
            if parent.project_id != req.project_id {
                return Err(AppError::ConstraintViolation(format!(
                    "parent task {} belongs to another project",
                    parent_id
                )));
            }
        }

        let sort_order: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(MAX(sort_order) + 1, 0) FROM tasks
            WHERE project_id = ? AND parent_task_id IS ?
            "#,
        )
        .bind(&req.project_id)
        .bind(&req.parent_task_id)
        .fetch_one(&mut *tx)
        .await?;

        let status = req.status.unwrap_or_default();
        let progress = if status == TaskStatus::Done {
            MAX_PROGRESS_PERCENTAGE
        } else {
            req.progress_percentage.unwrap_or(0)
        };

        let task = sqlx::query_as::<_, Task>(
            r#"
            INSERT INTO tasks
                (id, project_id, parent_task_id, title, description, is_completed, status,
                 priority, due_date, estimated_hours, actual_hours, progress_percentage,
                 tags, sort_order, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&req.project_id)
        .bind(&req.parent_task_id)
        .bind(&req.title)
        .bind(&req.description)
        .bind(status == TaskStatus::Done)
        .bind(status)
        .bind(req.priority.unwrap_or_default())
        .bind(req.due_date)
        .bind(req.estimated_hours)
        .bind(req.actual_hours)
        .bind(progress)
        .bind(req.tags.map(Json))
        .bind(sort_order)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!("Created task: {} in project {}", id, task.project_id);
        Ok(task)
    }

    /// Apply a partial update to a task
    pub async fn update_task(&self, user_id: &str, id: &str, req: UpdateTaskRequest) -> Result<Task> {
        let mut tx = self.pool.begin().await?;
        fetch_owned_task(&mut tx, user_id, id).await?;

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE tasks SET updated_at = ");
        qb.push_bind(Utc::now());

        if let Some(title) = req.title {
            qb.push(", title = ").push_bind(title);
        }
        if let Some(description) = req.description {
            qb.push(", description = ").push_bind(description);
        }
        if let Some(is_completed) = req.is_completed {
            qb.push(", is_completed = ").push_bind(is_completed);
        }
        if let Some(status) = req.status {
            qb.push(", status = ").push_bind(status);
        }
        if let Some(priority) = req.priority {
            qb.push(", priority = ").push_bind(priority);
        }
        if let Some(due_date) = req.due_date {
            qb.push(", due_date = ").push_bind(due_date);
        }
        if let Some(estimated_hours) = req.estimated_hours {
            qb.push(", estimated_hours = ").push_bind(estimated_hours);
        }
        if let Some(actual_hours) = req.actual_hours {
            qb.push(", actual_hours = ").push_bind(actual_hours);
        }
        if let Some(progress) = req.progress_percentage {
            qb.push(", progress_percentage = ").push_bind(progress);
        }
        if let Some(tags) = req.tags {
            qb.push(", tags = ").push_bind(tags.map(Json));
        }

        qb.push(" WHERE id = ").push_bind(id.to_string());
        qb.build().execute(&mut *tx).await?;

        let task = fetch_owned_task(&mut tx, user_id, id).await?;
        tx.commit().await?;

        tracing::debug!("Updated task: {}", id);
        Ok(task)
    }

    /// Re-parent and reposition a task.
    ///
    /// The new parent must live in the same project and must not be the
    /// task itself or one of its descendants.
    pub async fn move_task(
        &self,
        user_id: &str,
        id: &str,
        parent_task_id: Option<&str>,
        sort_order: i64,
    ) -> Result<Task> {
        let mut tx = self.pool.begin().await?;
        let task = fetch_owned_task(&mut tx, user_id, id).await?;

        if let Some(parent_id) = parent_task_id {
            let parent = fetch_owned_task(&mut tx, user_id, parent_id).await?;
            if parent.project_id != task.project_id {
                return Err(AppError::ConstraintViolation(format!(
                    "parent task {} belongs to another project",
                    parent_id
                )));
            }

            let subtree = subtree_ids(&mut tx, id).await?;
            if subtree.iter().any(|t| t == parent_id) {
                return Err(AppError::ConstraintViolation(format!(
                    "task {} cannot be nested under itself or its descendant {}",
                    id, parent_id
                )));
            }
        }

        sqlx::query("UPDATE tasks SET parent_task_id = ?, sort_order = ?, updated_at = ? WHERE id = ?")
            .bind(parent_task_id)
            .bind(sort_order)
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let moved = fetch_owned_task(&mut tx, user_id, id).await?;
        tx.commit().await?;

        tracing::debug!("Moved task {} under {:?} at {}", id, parent_task_id, sort_order);
        Ok(moved)
    }

    /// Write new task positions as one batch
    pub async fn update_task_orders(&self, user_id: &str, updates: &[SortUpdate]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        for update in updates {
            fetch_owned_task(&mut tx, user_id, &update.id).await?;

            sqlx::query("UPDATE tasks SET sort_order = ?, updated_at = ? WHERE id = ?")
                .bind(update.sort_order)
                .bind(now)
                .bind(&update.id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        tracing::debug!("Reordered {} tasks", updates.len());
        Ok(())
    }

    /// Delete a task and all of its descendants in one transaction
    pub async fn delete_task(&self, user_id: &str, id: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        fetch_owned_task(&mut tx, user_id, id).await?;

        let subtree = subtree_ids(&mut tx, id).await?;

        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM tasks WHERE id IN (");
        let mut separated = qb.separated(", ");
        for task_id in &subtree {
            separated.push_bind(task_id.clone());
        }
        separated.push_unseparated(")");

        let deleted = qb.build().execute(&mut *tx).await?.rows_affected();
        tx.commit().await?;

        tracing::debug!("Deleted task {} with {} row(s) in its subtree", id, deleted);
        Ok(deleted)
    }

    // ===== Profiles =====

    /// Get a profile by user ID
    pub async fn get_profile(&self, id: &str) -> Result<Option<Profile>> {
        let profile = sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(profile)
    }

    /// Create a profile, leaving an existing one untouched
    pub async fn create_profile(&self, id: &str, email: &str, name: Option<&str>) -> Result<Profile> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO profiles (id, email, name, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(email)
        .bind(name)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::debug!("Ensured profile row for user: {}", id);

        self.get_profile(id)
            .await?
            .ok_or_else(|| AppError::not_found("Profile", id))
    }
}

async fn insert_status(
    conn: &mut SqliteConnection,
    user_id: &str,
    name: &str,
    color: &str,
    sort_order: i64,
) -> Result<Status> {
    let now = Utc::now();

    let status = sqlx::query_as::<_, Status>(
        r#"
        INSERT INTO project_statuses (id, user_id, name, color, sort_order, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(name)
    .bind(color)
    .bind(sort_order)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    Ok(status)
}

async fn write_project_orders(
    conn: &mut SqliteConnection,
    user_id: &str,
    updates: &[SortUpdate],
) -> Result<()> {
    let now = Utc::now();

    for update in updates {
        let rows = sqlx::query(
            "UPDATE projects SET sort_order = ?, updated_at = ? WHERE id = ? AND user_id = ?",
        )
        .bind(update.sort_order)
        .bind(now)
        .bind(&update.id)
        .bind(user_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(AppError::not_found("Project", update.id.clone()));
        }
    }

    Ok(())
}

/// A project may only reference a status of the same owner
async fn ensure_status_owned(conn: &mut SqliteConnection, user_id: &str, status_id: &str) -> Result<()> {
    let owner: Option<String> = sqlx::query_scalar("SELECT user_id FROM project_statuses WHERE id = ?")
        .bind(status_id)
        .fetch_optional(&mut *conn)
        .await?;

    match owner {
        Some(owner) if owner == user_id => Ok(()),
        Some(_) => Err(AppError::ConstraintViolation(format!(
            "status {} belongs to another user",
            status_id
        ))),
        None => Err(AppError::not_found("Status", status_id)),
    }
}

async fn fetch_owned_task(conn: &mut SqliteConnection, user_id: &str, id: &str) -> Result<Task> {
    sqlx::query_as::<_, Task>(
        r#"
        SELECT t.* FROM tasks t
        JOIN projects p ON p.id = t.project_id
        WHERE t.id = ? AND p.user_id = ?
        "#,
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::not_found("Task", id))
}

/// IDs of a task and every descendant below it
async fn subtree_ids(conn: &mut SqliteConnection, id: &str) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar::<_, String>(
        r#"
        WITH RECURSIVE subtree(id) AS (
            SELECT id FROM tasks WHERE id = ?
            UNION
            SELECT t.id FROM tasks t JOIN subtree s ON t.parent_task_id = s.id
        )
        SELECT id FROM subtree
        "#,
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::create_memory_pool;

    const USER: &str = "user-1";

    async fn create_test_repo() -> Repository {
        let pool = create_memory_pool().await.unwrap();
        Repository::new(pool)
    }

    async fn create_project_in(repo: &Repository, name: &str, status_id: Option<&str>) -> Project {
        repo.create_project(
            USER,
            CreateProjectRequest {
                name: name.to_string(),
                status_id: status_id.map(str::to_string),
                ..Default::default()
            },
        )
        .await
        .unwrap()
    }

    async fn create_task_in(repo: &Repository, project_id: &str, parent: Option<&str>, title: &str) -> Task {
        repo.create_task(
            USER,
            CreateTaskRequest {
                project_id: project_id.to_string(),
                parent_task_id: parent.map(str::to_string),
                title: title.to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_status_appends() {
        let repo = create_test_repo().await;

        let first = repo.create_status(USER, "Todo", "#111111").await.unwrap();
        let second = repo.create_status(USER, "Doing", "#222222").await.unwrap();

        assert_eq!(first.sort_order, 0);
        assert_eq!(second.sort_order, 1);

        let listed = repo.list_statuses(USER).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "Todo");
    }

    #[tokio::test]
    async fn test_update_status() {
        let repo = create_test_repo().await;
        let status = repo.create_status(USER, "Todo", "#111111").await.unwrap();

        let updated = repo
            .update_status(USER, &status.id, Some("Backlog"), None)
            .await
            .unwrap();

        assert_eq!(updated.name, "Backlog");
        assert_eq!(updated.color, "#111111");
    }

    #[tokio::test]
    async fn test_delete_referenced_status_fails() {
        let repo = create_test_repo().await;
        let status = repo.create_status(USER, "Todo", "#111111").await.unwrap();
        let project = create_project_in(&repo, "Site", Some(&status.id)).await;

        let result = repo.delete_status(USER, &status.id).await;
        assert!(matches!(result, Err(AppError::ConstraintViolation(_))));

        // Nothing changed
        assert_eq!(repo.list_statuses(USER).await.unwrap().len(), 1);
        let fetched = repo.get_project(USER, &project.id).await.unwrap();
        assert_eq!(fetched, project);
    }

    #[tokio::test]
    async fn test_delete_unreferenced_status() {
        let repo = create_test_repo().await;
        let status = repo.create_status(USER, "Todo", "#111111").await.unwrap();

        repo.delete_status(USER, &status.id).await.unwrap();

        assert!(repo.list_statuses(USER).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_project_positions_step_within_status() {
        let repo = create_test_repo().await;
        let status = repo.create_status(USER, "Todo", "#111111").await.unwrap();

        let a = create_project_in(&repo, "A", Some(&status.id)).await;
        let b = create_project_in(&repo, "B", Some(&status.id)).await;
        let loose = create_project_in(&repo, "Loose", None).await;

        assert_eq!(a.sort_order, 0);
        assert_eq!(b.sort_order, SORT_STEP);
        assert_eq!(loose.sort_order, 0);
    }

    #[tokio::test]
    async fn test_project_rejects_foreign_status() {
        let repo = create_test_repo().await;
        let foreign = repo.create_status("user-2", "Theirs", "#111111").await.unwrap();

        let result = repo
            .create_project(
                USER,
                CreateProjectRequest {
                    name: "Mine".to_string(),
                    status_id: Some(foreign.id),
                    ..Default::default()
                },
            )
            .await;

        assert!(matches!(result, Err(AppError::ConstraintViolation(_))));
    }

    #[tokio::test]
    async fn test_update_project_clears_memo() {
        let repo = create_test_repo().await;
        let project = repo
            .create_project(
                USER,
                CreateProjectRequest {
                    name: "Site".to_string(),
                    memo: Some("call back".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let updated = repo
            .update_project(
                USER,
                &project.id,
                UpdateProjectRequest {
                    name: Some("Site v2".to_string()),
                    memo: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name, "Site v2");
        assert_eq!(updated.memo, None);
    }

    #[tokio::test]
    async fn test_update_project_status_appends_to_column() {
        let repo = create_test_repo().await;
        let todo = repo.create_status(USER, "Todo", "#111111").await.unwrap();
        let done = repo.create_status(USER, "Done", "#222222").await.unwrap();
        create_project_in(&repo, "A", Some(&todo.id)).await;
        let b = create_project_in(&repo, "B", Some(&todo.id)).await;
        create_project_in(&repo, "C", Some(&done.id)).await;
        create_project_in(&repo, "D", Some(&done.id)).await;
        assert_eq!(b.sort_order, SORT_STEP);

        let moved = repo
            .update_project(
                USER,
                &b.id,
                UpdateProjectRequest {
                    status_id: Some(Some(done.id.clone())),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(moved.status_id.as_deref(), Some(done.id.as_str()));
        assert_eq!(moved.sort_order, 2 * SORT_STEP);

        // Same status again keeps the position
        let same = repo
            .update_project(
                USER,
                &b.id,
                UpdateProjectRequest {
                    status_id: Some(Some(done.id.clone())),
                    name: Some("B2".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(same.sort_order, 2 * SORT_STEP);

        // An explicit position wins
        let placed = repo
            .update_project(
                USER,
                &b.id,
                UpdateProjectRequest {
                    status_id: Some(Some(todo.id.clone())),
                    sort_order: Some(7),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(placed.sort_order, 7);

        // Into an empty column
        let empty = repo.create_status(USER, "Hold", "#333333").await.unwrap();
        let parked = repo
            .update_project(
                USER,
                &b.id,
                UpdateProjectRequest {
                    status_id: Some(Some(empty.id.clone())),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(parked.sort_order, 0);
    }

    #[tokio::test]
    async fn test_move_project() {
        let repo = create_test_repo().await;
        let todo = repo.create_status(USER, "Todo", "#111111").await.unwrap();
        let done = repo.create_status(USER, "Done", "#222222").await.unwrap();
        let project = create_project_in(&repo, "Site", Some(&todo.id)).await;

        let other = create_project_in(&repo, "Other", Some(&done.id)).await;

        repo.move_project(
            USER,
            &project.id,
            &done.id,
            0,
            &[SortUpdate::new(other.id.clone(), SORT_STEP)],
        )
        .await
        .unwrap();

        let moved = repo.get_project(USER, &project.id).await.unwrap();
        assert_eq!(moved.status_id.as_deref(), Some(done.id.as_str()));
        assert_eq!(moved.sort_order, 0);
        assert_eq!(repo.get_project(USER, &other.id).await.unwrap().sort_order, SORT_STEP);
    }

    #[tokio::test]
    async fn test_failed_move_changes_nothing() {
        let repo = create_test_repo().await;
        let todo = repo.create_status(USER, "Todo", "#111111").await.unwrap();
        let done = repo.create_status(USER, "Done", "#222222").await.unwrap();
        let project = create_project_in(&repo, "Site", Some(&todo.id)).await;

        let result = repo
            .move_project(
                USER,
                &project.id,
                &done.id,
                0,
                &[SortUpdate::new("missing", 10)],
            )
            .await;

        assert!(result.is_err());
        let unchanged = repo.get_project(USER, &project.id).await.unwrap();
        assert_eq!(unchanged.status_id.as_deref(), Some(todo.id.as_str()));
    }

    #[tokio::test]
    async fn test_move_project_to_missing_status() {
        let repo = create_test_repo().await;
        let project = create_project_in(&repo, "Site", None).await;

        let result = repo.move_project(USER, &project.id, "nope", 0, &[]).await;
        assert!(matches!(result, Err(AppError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_delete_project_removes_tasks() {
        let repo = create_test_repo().await;
        let project = create_project_in(&repo, "Site", None).await;
        let root = create_task_in(&repo, &project.id, None, "root").await;
        create_task_in(&repo, &project.id, Some(&root.id), "child").await;

        let deleted = repo.delete_project(USER, &project.id).await.unwrap();
        assert_eq!(deleted, 2);

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks")
            .fetch_one(repo.pool())
            .await
            .unwrap();
        assert_eq!(remaining, 0);
        assert!(repo.get_project(USER, &project.id).await.is_err());
    }

    #[tokio::test]
    async fn test_task_defaults_and_sibling_positions() {
        let repo = create_test_repo().await;
        let project = create_project_in(&repo, "Site", None).await;

        let first = create_task_in(&repo, &project.id, None, "first").await;
        let second = create_task_in(&repo, &project.id, None, "second").await;
        let child = create_task_in(&repo, &project.id, Some(&first.id), "child").await;

        assert_eq!(first.status, TaskStatus::Todo);
        assert_eq!(first.priority, TaskPriority::Medium);
        assert!(!first.is_completed);
        assert_eq!(first.progress_percentage, 0);
        assert_eq!(first.sort_order, 0);
        assert_eq!(second.sort_order, 1);
        assert_eq!(child.sort_order, 0);
    }

    #[tokio::test]
    async fn test_create_done_task_is_complete() {
        let repo = create_test_repo().await;
        let project = create_project_in(&repo, "Site", None).await;

        let task = repo
            .create_task(
                USER,
                CreateTaskRequest {
                    project_id: project.id.clone(),
                    title: "shipped".to_string(),
                    status: Some(TaskStatus::Done),
                    progress_percentage: Some(40),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(task.is_completed);
        assert_eq!(task.progress_percentage, MAX_PROGRESS_PERCENTAGE);
    }

    #[tokio::test]
    async fn test_update_task_tags() {
        let repo = create_test_repo().await;
        let project = create_project_in(&repo, "Site", None).await;
        let task = create_task_in(&repo, &project.id, None, "design").await;

        let updated = repo
            .update_task(
                USER,
                &task.id,
                UpdateTaskRequest {
                    tags: Some(Some(vec!["ui".to_string(), "urgent".to_string()])),
                    priority: Some(TaskPriority::High),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.tag_list(), ["ui".to_string(), "urgent".to_string()]);
        assert_eq!(updated.priority, TaskPriority::High);
    }

    #[tokio::test]
    async fn test_delete_task_removes_descendants() {
        let repo = create_test_repo().await;
        let project = create_project_in(&repo, "Site", None).await;
        let root = create_task_in(&repo, &project.id, None, "root").await;
        let mid = create_task_in(&repo, &project.id, Some(&root.id), "mid").await;
        create_task_in(&repo, &project.id, Some(&mid.id), "leaf").await;
        let other = create_task_in(&repo, &project.id, None, "other").await;

        let deleted = repo.delete_task(USER, &root.id).await.unwrap();
        assert_eq!(deleted, 3);

        let remaining = repo.list_tasks(USER, &project.id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, other.id);
    }

    #[tokio::test]
    async fn test_move_task_rejects_descendant_parent() {
        let repo = create_test_repo().await;
        let project = create_project_in(&repo, "Site", None).await;
        let root = create_task_in(&repo, &project.id, None, "root").await;
        let child = create_task_in(&repo, &project.id, Some(&root.id), "child").await;

        let result = repo.move_task(USER, &root.id, Some(&child.id), 0).await;
        assert!(matches!(result, Err(AppError::ConstraintViolation(_))));

        let result = repo.move_task(USER, &root.id, Some(&root.id), 0).await;
        assert!(matches!(result, Err(AppError::ConstraintViolation(_))));

        let moved = repo.move_task(USER, &child.id, None, 5).await.unwrap();
        assert_eq!(moved.parent_task_id, None);
        assert_eq!(moved.sort_order, 5);
    }

    #[tokio::test]
    async fn test_tasks_scoped_to_owner() {
        let repo = create_test_repo().await;
        let project = create_project_in(&repo, "Site", None).await;
        let task = create_task_in(&repo, &project.id, None, "secret").await;

        assert!(repo.get_task("user-2", &task.id).await.is_err());
        assert!(repo.list_tasks("user-2", &project.id).await.is_err());
    }

    #[tokio::test]
    async fn test_profiles() {
        let repo = create_test_repo().await;

        assert!(repo.get_profile("u1").await.unwrap().is_none());

        let profile = repo.create_profile("u1", "a@example.com", Some("Aki")).await.unwrap();
        assert_eq!(profile.name.as_deref(), Some("Aki"));

        // Existing profile is kept
        let again = repo.create_profile("u1", "other@example.com", None).await.unwrap();
        assert_eq!(again.email, "a@example.com");
    }
}
