// anken - kanban board engine for client projects
// Entry point: loads configuration, opens the database and the signed-in board

use anken::auth::LocalAuth;
use anken::config::AppConfig;
use anken::AppState;
use anyhow::Context;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CONFIG_ENV: &str = "ANKEN_CONFIG";
const SESSION_TOKEN_ENV: &str = "ANKEN_SESSION_TOKEN";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "anken=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting anken");

    let config_path = std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("anken.json"));

    let config = AppConfig::load(&config_path)
        .await
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let state = AppState::initialize(config)
        .await
        .context("failed to initialize application state")?;
    let _auth_watch = state.watch_auth_events();

    if let Ok(token) = std::env::var(SESSION_TOKEN_ENV) {
        restore_session(&state.auth, &token).await?;
    }

    match state.open_board().await.context("failed to open board")? {
        Some((context, board)) => {
            tracing::info!("Board opened for {}", context.user.email);
            for column in board.columns().await {
                tracing::info!("{}: {} project(s)", column.status.name, column.cards.len());
            }
        }
        None => tracing::info!("No active session; set {} to resume one", SESSION_TOKEN_ENV),
    }

    Ok(())
}

async fn restore_session(auth: &LocalAuth, token: &str) -> anyhow::Result<()> {
    match auth.restore(token).await.context("failed to restore session")? {
        Some(session) => tracing::info!("Resumed session for user {}", session.user.id),
        None => tracing::warn!("Session token from {} is not valid", SESSION_TOKEN_ENV),
    }
    Ok(())
}
