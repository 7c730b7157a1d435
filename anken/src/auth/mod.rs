//! Authentication
//!
//! The board only needs to know who is signed in. [`AuthProvider`] is the
//! seam to the auth backend; [`LocalAuth`] keeps users and sessions in the
//! application database.

pub mod local;
pub mod session;

pub use local::LocalAuth;
pub use session::{SessionContext, SessionInitializer};

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    /// Bearer token handed to the client. Only its digest is stored.
    pub access_token: String,
    pub user: User,
    pub expires_at: DateTime<Utc>,
}

/// Optional profile data supplied at sign-up
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignUpAttributes {
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuthEvent {
    SignedIn { user_id: String },
    SignedOut,
    TokenRefreshed { user_id: String },
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Register a user and sign them in
    async fn sign_up(&self, email: &str, password: &str, attributes: SignUpAttributes) -> Result<Session>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session>;

    async fn sign_out(&self) -> Result<()>;

    /// The active session, or `None` when signed out or expired
    async fn current_session(&self) -> Result<Option<Session>>;

    async fn current_user(&self) -> Result<Option<User>> {
        Ok(self.current_session().await?.map(|session| session.user))
    }

    /// Replace the active session's token and extend its lifetime
    async fn refresh_session(&self) -> Result<Session>;

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}
