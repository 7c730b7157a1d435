//! Task hierarchy
//!
//! Builds a forest from a project's flat task list. Nodes live in one
//! arena vector and refer to their children by index. Malformed input
//! is rejected as a whole with every problem found.

use crate::database::Task;
use crate::error::{AppError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// A structural problem in a task list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HierarchyIssue {
    SelfParent { task_id: String },
    Orphan { task_id: String, parent_id: String },
    Cycle { task_ids: Vec<String> },
    DuplicateId { task_id: String },
}

impl fmt::Display for HierarchyIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HierarchyIssue::SelfParent { task_id } => {
                write!(f, "task {} is its own parent", task_id)
            }
            HierarchyIssue::Orphan { task_id, parent_id } => {
                write!(f, "task {} references missing parent {}", task_id, parent_id)
            }
            HierarchyIssue::Cycle { task_ids } => {
                write!(f, "cycle through tasks {}", task_ids.join(" -> "))
            }
            HierarchyIssue::DuplicateId { task_id } => {
                write!(f, "task id {} appears more than once", task_id)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskNode {
    pub task: Task,
    pub children: Vec<usize>,
}

/// Nested form for serialization
#[derive(Debug, Clone, Serialize)]
pub struct TaskTree {
    #[serde(flatten)]
    pub task: Task,
    pub children: Vec<TaskTree>,
}

/// Completed vs total tasks in a forest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskProgress {
    pub completed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Default)]
pub struct TaskForest {
    nodes: Vec<TaskNode>,
    roots: Vec<usize>,
}

#[derive(Clone, Copy, PartialEq)]
enum Visit {
    New,
    OnPath,
    Done,
}

impl TaskForest {
    /// Build the forest. Siblings are ordered by `sort_order`, ties keep
    /// input order.
    pub fn build(tasks: Vec<Task>) -> Result<Self> {
        let mut issues = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(tasks.len());

        for (i, task) in tasks.iter().enumerate() {
            if index.insert(task.id.as_str(), i).is_some() {
                issues.push(HierarchyIssue::DuplicateId {
                    task_id: task.id.clone(),
                });
            }
        }

        let mut parents: Vec<Option<usize>> = vec![None; tasks.len()];
        for (i, task) in tasks.iter().enumerate() {
            let Some(parent_id) = task.parent_task_id.as_deref() else {
                continue;
            };

            if parent_id == task.id {
                issues.push(HierarchyIssue::SelfParent {
                    task_id: task.id.clone(),
                });
                continue;
            }

            match index.get(parent_id) {
                Some(&p) => parents[i] = Some(p),
                None => issues.push(HierarchyIssue::Orphan {
                    task_id: task.id.clone(),
                    parent_id: parent_id.to_string(),
                }),
            }
        }

        // Follow parent links; revisiting a node on the current path is a cycle
        let mut visit = vec![Visit::New; tasks.len()];
        for start in 0..tasks.len() {
            let mut path = Vec::new();
            let mut current = Some(start);

            while let Some(i) = current {
                match visit[i] {
                    Visit::New => {
                        visit[i] = Visit::OnPath;
                        path.push(i);
                        current = parents[i];
                    }
                    Visit::OnPath => {
                        let from = path.iter().position(|&p| p == i).unwrap_or(0);
                        issues.push(HierarchyIssue::Cycle {
                            task_ids: path[from..].iter().map(|&p| tasks[p].id.clone()).collect(),
                        });
                        break;
                    }
                    Visit::Done => break,
                }
            }

            for i in path {
                visit[i] = Visit::Done;
            }
        }

        if !issues.is_empty() {
            tracing::warn!("Rejected task hierarchy with {} issue(s)", issues.len());
            return Err(AppError::InvalidHierarchy(issues));
        }

        let mut roots = Vec::new();
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];
        for (i, parent) in parents.iter().enumerate() {
            match parent {
                Some(p) => children[*p].push(i),
                None => roots.push(i),
            }
        }

        let by_position = |list: &mut Vec<usize>| list.sort_by_key(|&i| tasks[i].sort_order);
        by_position(&mut roots);
        children.iter_mut().for_each(by_position);

        let nodes = tasks
            .into_iter()
            .zip(children)
            .map(|(task, children)| TaskNode { task, children })
            .collect();

        Ok(Self { nodes, roots })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> impl Iterator<Item = &TaskNode> {
        self.roots.iter().map(|&i| &self.nodes[i])
    }

    pub fn children<'a>(&'a self, node: &'a TaskNode) -> impl Iterator<Item = &'a TaskNode> {
        node.children.iter().map(|&i| &self.nodes[i])
    }

    pub fn get(&self, id: &str) -> Option<&TaskNode> {
        self.nodes.iter().find(|node| node.task.id == id)
    }

    /// Depth-first walk in display order, yielding `(depth, task)`
    pub fn walk(&self) -> Vec<(usize, &Task)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(usize, usize)> = self.roots.iter().rev().map(|&i| (0, i)).collect();

        while let Some((depth, i)) = stack.pop() {
            let node = &self.nodes[i];
            out.push((depth, &node.task));
            stack.extend(node.children.iter().rev().map(|&c| (depth + 1, c)));
        }

        out
    }

    pub fn progress(&self) -> TaskProgress {
        TaskProgress {
            completed: self.nodes.iter().filter(|n| n.task.is_completed).count(),
            total: self.nodes.len(),
        }
    }

    /// Convert into the nested form
    pub fn into_trees(self) -> Vec<TaskTree> {
        let mut slots: Vec<Option<TaskNode>> = self.nodes.into_iter().map(Some).collect();
        self.roots
            .iter()
            .filter_map(|&i| take_tree(&mut slots, i))
            .collect()
    }
}

fn take_tree(slots: &mut [Option<TaskNode>], i: usize) -> Option<TaskTree> {
    let node = slots.get_mut(i)?.take()?;
    let children = node
        .children
        .iter()
        .filter_map(|&c| take_tree(slots, c))
        .collect();

    Some(TaskTree {
        task: node.task,
        children,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{TaskPriority, TaskStatus};
    use chrono::Utc;

    fn task(id: &str, parent: Option<&str>, sort_order: i64) -> Task {
        Task {
            id: id.to_string(),
            project_id: "p1".to_string(),
            parent_task_id: parent.map(str::to_string),
            title: id.to_string(),
            description: None,
            is_completed: false,
            status: TaskStatus::Todo,
            priority: TaskPriority::Medium,
            due_date: None,
            estimated_hours: None,
            actual_hours: None,
            progress_percentage: 0,
            tags: None,
            sort_order,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn issues(result: Result<TaskForest>) -> Vec<HierarchyIssue> {
        match result {
            Err(AppError::InvalidHierarchy(issues)) => issues,
            other => panic!("expected InvalidHierarchy, got {:?}", other.map(|f| f.len())),
        }
    }

    #[test]
    fn test_chain_round_trip() {
        let tasks = vec![
            task("leaf", Some("mid"), 0),
            task("root", None, 0),
            task("mid", Some("root"), 0),
        ];

        let forest = TaskForest::build(tasks).unwrap();

        assert_eq!(forest.len(), 3);
        assert_eq!(forest.roots().count(), 1);

        let walked: Vec<(usize, &str)> = forest
            .walk()
            .into_iter()
            .map(|(depth, t)| (depth, t.id.as_str()))
            .collect();
        assert_eq!(walked, vec![(0, "root"), (1, "mid"), (2, "leaf")]);
    }

    #[test]
    fn test_siblings_follow_sort_order() {
        let tasks = vec![
            task("root", None, 0),
            task("b", Some("root"), 2),
            task("a", Some("root"), 1),
            task("c", Some("root"), 2),
            task("other", None, -1),
        ];

        let forest = TaskForest::build(tasks).unwrap();

        let ids: Vec<&str> = forest.walk().iter().map(|(_, t)| t.id.as_str()).collect();
        assert_eq!(ids, vec!["other", "root", "a", "b", "c"]);
    }

    #[test]
    fn test_empty_input() {
        let forest = TaskForest::build(Vec::new()).unwrap();
        assert!(forest.is_empty());
        assert!(forest.walk().is_empty());
    }

    #[test]
    fn test_self_parent_rejected() {
        let found = issues(TaskForest::build(vec![task("a", Some("a"), 0)]));

        assert_eq!(
            found,
            vec![HierarchyIssue::SelfParent {
                task_id: "a".to_string()
            }]
        );
    }

    #[test]
    fn test_orphan_rejected() {
        let found = issues(TaskForest::build(vec![
            task("a", None, 0),
            task("b", Some("gone"), 0),
        ]));

        assert_eq!(
            found,
            vec![HierarchyIssue::Orphan {
                task_id: "b".to_string(),
                parent_id: "gone".to_string()
            }]
        );
    }

    #[test]
    fn test_cycle_rejected() {
        let found = issues(TaskForest::build(vec![
            task("root", None, 0),
            task("a", Some("b"), 0),
            task("b", Some("a"), 0),
        ]));

        assert_eq!(found.len(), 1);
        match &found[0] {
            HierarchyIssue::Cycle { task_ids } => {
                assert_eq!(task_ids.len(), 2);
                assert!(task_ids.contains(&"a".to_string()));
                assert!(task_ids.contains(&"b".to_string()));
            }
            other => panic!("unexpected issue {}", other),
        }
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let found = issues(TaskForest::build(vec![task("a", None, 0), task("a", None, 1)]));

        assert!(found.contains(&HierarchyIssue::DuplicateId {
            task_id: "a".to_string()
        }));
    }

    #[test]
    fn test_progress_and_nested_form() {
        let mut done = task("child", Some("root"), 0);
        done.is_completed = true;

        let forest = TaskForest::build(vec![task("root", None, 0), done]).unwrap();
        assert_eq!(
            forest.progress(),
            TaskProgress {
                completed: 1,
                total: 2
            }
        );

        let trees = forest.into_trees();
        assert_eq!(trees.len(), 1);
        assert_eq!(trees[0].children[0].task.id, "child");

        let json = serde_json::to_value(&trees[0]).unwrap();
        assert_eq!(json["id"], "root");
        assert_eq!(json["children"][0]["id"], "child");
    }
}
