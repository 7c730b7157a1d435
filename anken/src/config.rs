//! Application configuration
//!
//! Central location for configuration constants and the on-disk
//! `AppConfig` file used by the board and the local auth service.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

// ===== Ordering =====

/// Position increment between neighbouring cards in a column.
/// Leaves room for later insertions without renumbering the column.
pub const SORT_STEP: i64 = 10;

// ===== Reload / Reconciliation =====

/// Minimum interval between two non-forced board reloads in seconds
pub const DEFAULT_RELOAD_INTERVAL_SECS: u64 = 10;

/// Bounded number of refetches when a reload races a settled operation
pub const MAX_RELOAD_ATTEMPTS: usize = 3;

/// Capacity of the board and auth event channels
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

// ===== Caching =====

/// Default time-to-live for cached list queries in seconds
pub const DEFAULT_CACHE_TTL_SECS: u64 = 60;

// ===== Session =====

/// Timeout for fetching the current session
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 5;

/// Timeout for fetching (or provisioning) the user profile
pub const DEFAULT_PROFILE_TIMEOUT_SECS: u64 = 10;

/// Lifetime of a local auth session (1 hour)
pub const DEFAULT_SESSION_TTL_SECS: u64 = 3600;

/// Minimum accepted password length for sign-up
pub const MIN_PASSWORD_LENGTH: usize = 6;

// ===== Tasks =====

/// Upper bound of a task's progress percentage
pub const MAX_PROGRESS_PERCENTAGE: i64 = 100;

// ===== Default statuses =====

/// Columns provisioned for a user who has none yet: (name, color)
pub const DEFAULT_STATUSES: &[(&str, &str)] = &[
    ("未着手", "#EF4444"),
    ("制作中", "#F59E0B"),
    ("確認待ち", "#3B82F6"),
    ("完了", "#10B981"),
];

/// Color assigned to a status created without one
pub const DEFAULT_STATUS_COLOR: &str = "#6B7280";

/// Runtime configuration persisted as JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_reload_interval")]
    pub reload_interval_secs: u64,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,
    #[serde(default = "default_profile_timeout")]
    pub profile_timeout_secs: u64,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("anken.db")
}

fn default_reload_interval() -> u64 {
    DEFAULT_RELOAD_INTERVAL_SECS
}

fn default_cache_ttl() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

fn default_session_timeout() -> u64 {
    DEFAULT_SESSION_TIMEOUT_SECS
}

fn default_profile_timeout() -> u64 {
    DEFAULT_PROFILE_TIMEOUT_SECS
}

fn default_session_ttl() -> u64 {
    DEFAULT_SESSION_TTL_SECS
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            reload_interval_secs: default_reload_interval(),
            cache_ttl_secs: default_cache_ttl(),
            session_timeout_secs: default_session_timeout(),
            profile_timeout_secs: default_profile_timeout(),
            session_ttl_secs: default_session_ttl(),
        }
    }
}

impl AppConfig {
    /// Load configuration from disk, writing the defaults if the file is missing
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("Config file not found, creating default config at {:?}", path);
            let default = AppConfig::default();
            default.save(path).await?;
            return Ok(default);
        }

        let content = fs::read_to_string(path).await?;
        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| AppError::Generic(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to disk
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await?;
        tracing::info!("Config saved to {:?}", path);

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.session_timeout_secs == 0 || self.profile_timeout_secs == 0 {
            return Err(AppError::Validation(
                "session and profile timeouts must be positive".to_string(),
            ));
        }
        if self.session_ttl_secs == 0 {
            return Err(AppError::Validation(
                "session_ttl_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_interval_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn profile_timeout(&self) -> Duration {
        Duration::from_secs(self.profile_timeout_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_default_config_created_on_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("anken.json");

        let config = AppConfig::load(&path).await.unwrap();

        assert!(path.exists());
        assert_eq!(config.reload_interval_secs, 10);
        assert_eq!(config.session_timeout_secs, 5);
        assert_eq!(config.profile_timeout_secs, 10);
        assert_eq!(config.cache_ttl_secs, 60);
    }

    #[tokio::test]
    async fn test_partial_config_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("anken.json");
        tokio::fs::write(&path, r#"{"reload_interval_secs": 30}"#)
            .await
            .unwrap();

        let config = AppConfig::load(&path).await.unwrap();

        assert_eq!(config.reload_interval(), Duration::from_secs(30));
        assert_eq!(config.database_path, PathBuf::from("anken.db"));
        assert_eq!(config.session_ttl_secs, DEFAULT_SESSION_TTL_SECS);
    }

    #[tokio::test]
    async fn test_zero_timeout_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("anken.json");
        tokio::fs::write(&path, r#"{"session_timeout_secs": 0}"#)
            .await
            .unwrap();

        let result = AppConfig::load(&path).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_default_statuses_are_four_columns() {
        assert_eq!(DEFAULT_STATUSES.len(), 4);
        assert_eq!(DEFAULT_STATUSES[0].0, "未着手");
    }
}
