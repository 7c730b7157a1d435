//! Error types for the anken board
//!
//! All errors use thiserror for structured error handling.
//! These errors can be serialized for display in a client.

use crate::tasks::tree::HierarchyIssue;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid task hierarchy: {}", format_issues(.0))]
    InvalidHierarchy(Vec<HierarchyIssue>),

    #[error("Failed to move project {project_id}: {source}")]
    MoveFailed {
        project_id: String,
        #[source]
        source: Box<AppError>,
    },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not signed in")]
    Unauthorized,

    #[error("{0}")]
    Generic(String),
}

impl AppError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        AppError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

fn format_issues(issues: &[HierarchyIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = AppError::not_found("Project", "p-1");
        assert_eq!(err.to_string(), "Project not found: p-1");
    }

    #[test]
    fn test_move_failed_keeps_source() {
        let err = AppError::MoveFailed {
            project_id: "p-1".to_string(),
            source: Box::new(AppError::Generic("connection reset".to_string())),
        };

        assert_eq!(
            err.to_string(),
            "Failed to move project p-1: connection reset"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_serializes_as_display_string() {
        let err = AppError::ConstraintViolation("status in use".to_string());
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"Constraint violation: status in use\"");
    }
}
