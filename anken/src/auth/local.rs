//! SQLite-backed auth provider
//!
//! Passwords are stored as Argon2id PHC strings. Session tokens are 32
//! random bytes; the database only keeps their SHA-256 digest.

use super::{AuthEvent, AuthProvider, Session, SignUpAttributes, User};
use crate::cache::Clock;
use crate::config::{EVENT_CHANNEL_CAPACITY, MIN_PASSWORD_LENGTH};
use crate::error::{AppError, Result};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::{FromRow, SqlitePool};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

const SALT_SIZE: usize = 16;
const TOKEN_SIZE: usize = 32;

#[derive(FromRow)]
struct UserRow {
    id: String,
    email: String,
    password_hash: String,
    name: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
            name: row.name,
            created_at: row.created_at,
        }
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn hash_password(password: &str) -> Result<String> {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);

    let salt_string = SaltString::encode_b64(&salt)
        .map_err(|e| AppError::Generic(format!("Salt encoding failed: {}", e)))?;

    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt_string)
        .map_err(|e| AppError::Generic(format!("Password hashing failed: {}", e)))?;

    Ok(hash.to_string())
}

fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::error!("Stored password hash is unreadable: {}", e);
            false
        }
    }
}

fn new_token() -> String {
    let mut bytes = [0u8; TOKEN_SIZE];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn token_digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn invalid_credentials() -> AppError {
    AppError::Auth("Invalid email or password".to_string())
}

/// Auth provider storing users and sessions in the application database
#[derive(Clone)]
pub struct LocalAuth {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    session_ttl: Duration,
    current: Arc<RwLock<Option<Session>>>,
    events: broadcast::Sender<AuthEvent>,
}

impl LocalAuth {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>, session_ttl: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            pool,
            clock,
            session_ttl,
            current: Arc::new(RwLock::new(None)),
            events,
        }
    }

    /// Resume a session from a token issued earlier, e.g. after a restart
    pub async fn restore(&self, access_token: &str) -> Result<Option<Session>> {
        let Some(session) = self.lookup_session(access_token).await? else {
            tracing::debug!("Stored session token is unknown or expired");
            return Ok(None);
        };

        *self.current.write().await = Some(session.clone());
        self.emit(AuthEvent::SignedIn {
            user_id: session.user.id.clone(),
        });

        Ok(Some(session))
    }

    async fn start_session(&self, user: User) -> Result<Session> {
        let access_token = new_token();
        let now = self.clock.now();
        let expires_at = now
            + chrono::Duration::from_std(self.session_ttl)
                .map_err(|e| AppError::Generic(format!("Invalid session lifetime: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO auth_sessions (token_hash, user_id, created_at, expires_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(token_digest(&access_token))
        .bind(&user.id)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        let session = Session {
            access_token,
            user,
            expires_at,
        };

        *self.current.write().await = Some(session.clone());
        Ok(session)
    }

    /// Load the session behind a token if it exists and has not expired
    async fn lookup_session(&self, access_token: &str) -> Result<Option<Session>> {
        let digest = token_digest(access_token);

        let row: Option<(String, DateTime<Utc>)> =
            sqlx::query_as("SELECT user_id, expires_at FROM auth_sessions WHERE token_hash = ?")
                .bind(&digest)
                .fetch_optional(&self.pool)
                .await?;

        let Some((user_id, expires_at)) = row else {
            return Ok(None);
        };

        if expires_at <= self.clock.now() {
            sqlx::query("DELETE FROM auth_sessions WHERE token_hash = ?")
                .bind(&digest)
                .execute(&self.pool)
                .await?;
            return Ok(None);
        }

        let user = sqlx::query_as::<_, UserRow>("SELECT * FROM auth_users WHERE id = ?")
            .bind(&user_id)
            .fetch_optional(&self.pool)
            .await?
            .map(User::from);

        Ok(user.map(|user| Session {
            access_token: access_token.to_string(),
            user,
            expires_at,
        }))
    }

    async fn revoke(&self, access_token: &str) -> Result<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE token_hash = ?")
            .bind(token_digest(access_token))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn emit(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl AuthProvider for LocalAuth {
    async fn sign_up(&self, email: &str, password: &str, attributes: SignUpAttributes) -> Result<Session> {
        let email = normalize_email(email);
        if !email.contains('@') {
            return Err(AppError::Validation(format!("invalid email address: {}", email)));
        }
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AppError::Validation(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            )));
        }

        let existing: Option<String> = sqlx::query_scalar("SELECT id FROM auth_users WHERE email = ?")
            .bind(&email)
            .fetch_optional(&self.pool)
            .await?;
        if existing.is_some() {
            return Err(AppError::Auth("Email is already registered".to_string()));
        }

        let user = User {
            id: Uuid::new_v4().to_string(),
            email,
            name: attributes.name.filter(|n| !n.trim().is_empty()),
            created_at: self.clock.now(),
        };

        sqlx::query(
            r#"
            INSERT INTO auth_users (id, email, password_hash, name, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(hash_password(password)?)
        .bind(&user.name)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;

        tracing::info!("Registered user {}", user.id);

        let session = self.start_session(user).await?;
        self.emit(AuthEvent::SignedIn {
            user_id: session.user.id.clone(),
        });
        Ok(session)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let email = normalize_email(email);

        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM auth_users WHERE email = ?")
            .bind(&email)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(invalid_credentials)?;

        if !verify_password(password, &row.password_hash) {
            tracing::warn!("Failed sign-in for {}", email);
            return Err(invalid_credentials());
        }

        let session = self.start_session(User::from(row)).await?;

        tracing::info!("User {} signed in", session.user.id);
        self.emit(AuthEvent::SignedIn {
            user_id: session.user.id.clone(),
        });
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        let previous = self.current.write().await.take();

        if let Some(session) = previous {
            self.revoke(&session.access_token).await?;
            tracing::info!("User {} signed out", session.user.id);
            self.emit(AuthEvent::SignedOut);
        }

        Ok(())
    }

    async fn current_session(&self) -> Result<Option<Session>> {
        let token = match self.current.read().await.as_ref() {
            Some(session) => session.access_token.clone(),
            None => return Ok(None),
        };

        let session = self.lookup_session(&token).await?;
        if session.is_none() {
            tracing::debug!("Active session is no longer valid");
            *self.current.write().await = None;
        }

        Ok(session)
    }

    async fn refresh_session(&self) -> Result<Session> {
        let current = self.current_session().await?.ok_or(AppError::Unauthorized)?;

        self.revoke(&current.access_token).await?;
        let session = self.start_session(current.user).await?;

        tracing::debug!("Session refreshed for user {}", session.user.id);
        self.emit(AuthEvent::TokenRefreshed {
            user_id: session.user.id.clone(),
        });
        Ok(session)
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
