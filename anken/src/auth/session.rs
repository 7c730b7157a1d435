//! Session start-up
//!
//! After sign-in the user's profile and default board columns must exist.
//! Each step runs under its own timeout; a timeout means "not available"
//! instead of an error, so a slow backend never blocks start-up.

use super::{AuthProvider, User};
use crate::database::{Profile, Repository};
use crate::error::Result;
use crate::services::ProjectsService;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// The signed-in user with their profile
#[derive(Debug, Clone, Serialize)]
pub struct SessionContext {
    pub user: User,
    /// `None` when the profile could not be loaded in time
    pub profile: Option<Profile>,
}

#[derive(Clone)]
pub struct SessionInitializer {
    auth: Arc<dyn AuthProvider>,
    repo: Repository,
    projects: ProjectsService,
    session_timeout: Duration,
    profile_timeout: Duration,
}

impl SessionInitializer {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        repo: Repository,
        projects: ProjectsService,
        session_timeout: Duration,
        profile_timeout: Duration,
    ) -> Self {
        Self {
            auth,
            repo,
            projects,
            session_timeout,
            profile_timeout,
        }
    }

    /// Resolve the active session and prepare the user's data.
    ///
    /// Returns `None` when nobody is signed in or the session lookup timed
    /// out.
    pub async fn initialize(&self) -> Result<Option<SessionContext>> {
        let session = match tokio::time::timeout(self.session_timeout, self.auth.current_session()).await {
            Ok(session) => session?,
            Err(_) => {
                tracing::warn!("Session lookup timed out after {:?}", self.session_timeout);
                return Ok(None);
            }
        };

        let Some(session) = session else {
            tracing::debug!("No active session");
            return Ok(None);
        };

        let user = session.user;
        let profile = match tokio::time::timeout(self.profile_timeout, self.prepare_user(&user)).await {
            Ok(profile) => Some(profile?),
            Err(_) => {
                tracing::warn!(
                    "Profile setup for user {} timed out after {:?}",
                    user.id,
                    self.profile_timeout
                );
                None
            }
        };

        tracing::info!("Session initialized for user {}", user.id);
        Ok(Some(SessionContext { user, profile }))
    }

    async fn prepare_user(&self, user: &User) -> Result<Profile> {
        let profile = match self.repo.get_profile(&user.id).await? {
            Some(profile) => profile,
            None => {
                tracing::info!("Creating profile for user {}", user.id);
                self.repo
                    .create_profile(&user.id, &user.email, user.name.as_deref())
                    .await?
            }
        };

        self.projects.ensure_default_statuses(&user.id).await?;
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthEvent, LocalAuth, Session, SignUpAttributes};
    use crate::cache::{ManualClock, QueryCache};
    use crate::database::create_memory_pool;
    use crate::error::AppError;
    use async_trait::async_trait;
    use tokio::sync::broadcast;

    struct StalledAuth;

    #[async_trait]
    impl AuthProvider for StalledAuth {
        async fn sign_up(
            &self,
            _email: &str,
            _password: &str,
            _attributes: SignUpAttributes,
        ) -> Result<Session> {
            Err(AppError::Auth("unsupported".to_string()))
        }

        async fn sign_in(&self, _email: &str, _password: &str) -> Result<Session> {
            Err(AppError::Auth("unsupported".to_string()))
        }

        async fn sign_out(&self) -> Result<()> {
            Ok(())
        }

        async fn current_session(&self) -> Result<Option<Session>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(None)
        }

        async fn refresh_session(&self) -> Result<Session> {
            Err(AppError::Unauthorized)
        }

        fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
            broadcast::channel(1).1
        }
    }

    async fn create_parts() -> (Repository, ProjectsService, LocalAuth) {
        let pool = create_memory_pool().await.unwrap();
        let repo = Repository::new(pool.clone());
        let clock = Arc::new(ManualClock::default());
        let projects = ProjectsService::new(
            repo.clone(),
            QueryCache::new(clock.clone()),
            Duration::from_secs(60),
        );
        let auth = LocalAuth::new(pool, clock, Duration::from_secs(3600));
        (repo, projects, auth)
    }

    #[tokio::test]
    async fn test_initialize_creates_profile_and_statuses() {
        let (repo, projects, auth) = create_parts().await;
        let session = auth
            .sign_up(
                "owner@example.com",
                "secret1",
                SignUpAttributes {
                    name: Some("Owner".to_string()),
                },
            )
            .await
            .unwrap();

        let initializer = SessionInitializer::new(
            Arc::new(auth),
            repo.clone(),
            projects.clone(),
            Duration::from_secs(5),
            Duration::from_secs(10),
        );

        let context = initializer.initialize().await.unwrap().unwrap();
        assert_eq!(context.user.id, session.user.id);
        assert_eq!(context.profile.unwrap().name.as_deref(), Some("Owner"));
        assert_eq!(projects.list_statuses(&session.user.id).await.unwrap().len(), 4);

        // Running again changes nothing
        initializer.initialize().await.unwrap().unwrap();
        assert_eq!(projects.list_statuses(&session.user.id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_signed_out_yields_none() {
        let (repo, projects, auth) = create_parts().await;
        let initializer = SessionInitializer::new(
            Arc::new(auth),
            repo,
            projects,
            Duration::from_secs(5),
            Duration::from_secs(10),
        );

        assert!(initializer.initialize().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_session_timeout_yields_none() {
        let (repo, projects, _auth) = create_parts().await;
        let initializer = SessionInitializer::new(
            Arc::new(StalledAuth),
            repo,
            projects,
            Duration::from_millis(20),
            Duration::from_secs(10),
        );

        assert!(initializer.initialize().await.unwrap().is_none());
    }
}
