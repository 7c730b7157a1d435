//! anken library
//!
//! Kanban board engine for client projects and their hierarchical tasks.
//! Exposed as a library so the binary, tests and other front ends share it.

pub mod app;
pub mod auth;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod kanban;
pub mod services;
pub mod tasks;

pub use app::AppState;
pub use error::{AppError, Result};
