//! Application state and initialization
//!
//! This module wires the database, cache, services and auth provider
//! together. All services are reachable through [`AppState`].

use crate::auth::{AuthEvent, AuthProvider, LocalAuth, SessionContext, SessionInitializer};
use crate::cache::{Clock, QueryCache, SystemClock};
use crate::config::AppConfig;
use crate::database::{create_pool, Repository};
use crate::error::Result;
use crate::kanban::Board;
use crate::services::{ProjectsService, TasksService};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Central application state holding all services
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub repo: Repository,
    pub cache: QueryCache,
    pub projects: ProjectsService,
    pub tasks: TasksService,
    pub auth: Arc<LocalAuth>,
    pub sessions: SessionInitializer,
    clock: Arc<dyn Clock>,
}

impl AppState {
    /// Open the database named in the config and build every service
    pub async fn initialize(config: AppConfig) -> Result<Self> {
        tracing::info!("Initializing application");

        let pool = create_pool(&config.database_path).await?;
        let state = Self::with_pool(config, pool, Arc::new(SystemClock));

        tracing::info!("Application initialized successfully");
        Ok(state)
    }

    /// Build the services over an existing, migrated pool
    pub fn with_pool(config: AppConfig, pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        let repo = Repository::new(pool.clone());
        let cache = QueryCache::new(clock.clone());
        let projects = ProjectsService::new(repo.clone(), cache.clone(), config.cache_ttl());
        let tasks = TasksService::new(repo.clone());
        let auth = Arc::new(LocalAuth::new(pool, clock.clone(), config.session_ttl()));
        let sessions = SessionInitializer::new(
            auth.clone(),
            repo.clone(),
            projects.clone(),
            config.session_timeout(),
            config.profile_timeout(),
        );

        Self {
            config,
            repo,
            cache,
            projects,
            tasks,
            auth,
            sessions,
            clock,
        }
    }

    /// A board for `user_id`, not yet loaded
    pub fn board_for(&self, user_id: &str) -> Board {
        Board::new(
            user_id,
            Arc::new(self.projects.clone()),
            self.clock.clone(),
            self.config.reload_interval(),
        )
    }

    /// Initialize the active session and load its board.
    ///
    /// Returns `None` when nobody is signed in.
    pub async fn open_board(&self) -> Result<Option<(SessionContext, Board)>> {
        let Some(context) = self.sessions.initialize().await? else {
            return Ok(None);
        };

        let board = self.board_for(&context.user.id);
        board.load(true).await?;

        Ok(Some((context, board)))
    }

    /// Drop cached queries whenever the signed-in user changes
    pub fn watch_auth_events(&self) -> JoinHandle<()> {
        let mut events = self.auth.subscribe();
        let cache = self.cache.clone();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(AuthEvent::SignedIn { .. }) | Ok(AuthEvent::SignedOut) => {
                        cache.invalidate_all();
                    }
                    Ok(AuthEvent::TokenRefreshed { .. }) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Missed {} auth events, clearing cache", skipped);
                        cache.invalidate_all();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SignUpAttributes;
    use crate::database::create_memory_pool;

    async fn create_test_state() -> AppState {
        let pool = create_memory_pool().await.unwrap();
        AppState::with_pool(AppConfig::default(), pool, Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn test_open_board_without_session() {
        let state = create_test_state().await;

        assert!(state.open_board().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_board_provisions_columns() {
        let state = create_test_state().await;
        state
            .auth
            .sign_up("owner@example.com", "secret1", SignUpAttributes::default())
            .await
            .unwrap();

        let (context, board) = state.open_board().await.unwrap().unwrap();

        assert_eq!(context.user.email, "owner@example.com");
        let columns = board.columns().await;
        let names: Vec<&str> = columns.iter().map(|c| c.status.name.as_str()).collect();
        assert_eq!(names, vec!["未着手", "制作中", "確認待ち", "完了"]);
    }

    #[tokio::test]
    async fn test_sign_out_clears_cache() {
        let state = create_test_state().await;
        let session = state
            .auth
            .sign_up("owner@example.com", "secret1", SignUpAttributes::default())
            .await
            .unwrap();
        let watcher = state.watch_auth_events();

        state.projects.list_statuses(&session.user.id).await.unwrap();
        assert!(!state.cache.is_empty());

        state.auth.sign_out().await.unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !state.cache.is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        watcher.abort();
    }
}
