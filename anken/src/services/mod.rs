//! Services module
//!
//! Business logic services that coordinate between callers and the
//! repository.

pub mod projects;
pub mod tasks;

pub use projects::ProjectsService;
pub use tasks::TasksService;
