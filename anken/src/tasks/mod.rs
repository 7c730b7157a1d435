//! Task hierarchy and completion rules

pub mod completion;
pub mod tree;

pub use completion::{completion_update, is_finished};
pub use tree::{HierarchyIssue, TaskForest, TaskNode, TaskProgress, TaskTree};
