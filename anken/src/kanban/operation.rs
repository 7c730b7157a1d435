//! Pending board operations
//!
//! Every optimistic change is tracked from the moment it is applied locally
//! until the store settles it. Reloads consult the tracker so they never
//! overwrite a patch whose persistence is still in flight.

use crate::database::SortUpdate;
use crate::error::{AppError, Result};
use crate::kanban::ordering::MovePlan;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

/// Settled operations remembered for inspection
const SETTLED_HISTORY: usize = 32;

pub type OperationId = u64;

/// Lifecycle of one optimistic change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Idle,
    Pending,
    Committed,
    RolledBack,
}

impl OperationState {
    pub fn is_settled(self) -> bool {
        matches!(self, OperationState::Committed | OperationState::RolledBack)
    }
}

/// What an operation changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationKind {
    MoveCard(MovePlan),
    MoveColumn { updates: Vec<SortUpdate> },
    CompactColumn {
        status_id: String,
        updates: Vec<SortUpdate>,
    },
}

#[derive(Debug, Clone)]
pub struct Operation {
    pub id: OperationId,
    pub kind: OperationKind,
    pub state: OperationState,
}

impl Operation {
    fn transition(&mut self, to: OperationState) -> Result<()> {
        let allowed = matches!(
            (self.state, to),
            (OperationState::Idle, OperationState::Pending)
                | (OperationState::Pending, OperationState::Committed)
                | (OperationState::Pending, OperationState::RolledBack)
        );

        if !allowed {
            return Err(AppError::Generic(format!(
                "operation {} cannot go from {:?} to {:?}",
                self.id, self.state, to
            )));
        }

        self.state = to;
        Ok(())
    }
}

/// Tracks in-flight and recently settled operations
#[derive(Debug, Default)]
pub struct OperationTracker {
    next_id: OperationId,
    active: HashMap<OperationId, Operation>,
    settled: VecDeque<Operation>,
}

impl OperationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new operation and move it to `Pending`
    pub fn begin(&mut self, kind: OperationKind) -> OperationId {
        self.next_id += 1;
        let id = self.next_id;

        let mut operation = Operation {
            id,
            kind,
            state: OperationState::Idle,
        };
        // Idle -> Pending is always allowed
        let _ = operation.transition(OperationState::Pending);

        self.active.insert(id, operation);
        id
    }

    pub fn commit(&mut self, id: OperationId) -> Result<()> {
        self.settle(id, OperationState::Committed)
    }

    pub fn roll_back(&mut self, id: OperationId) -> Result<()> {
        self.settle(id, OperationState::RolledBack)
    }

    fn settle(&mut self, id: OperationId, to: OperationState) -> Result<()> {
        let mut operation = self
            .active
            .remove(&id)
            .ok_or_else(|| AppError::not_found("Operation", id.to_string()))?;

        if let Err(e) = operation.transition(to) {
            self.active.insert(id, operation);
            return Err(e);
        }

        if self.settled.len() == SETTLED_HISTORY {
            self.settled.pop_front();
        }
        self.settled.push_back(operation);
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        self.active.len()
    }

    /// Current state, if the operation is active or recently settled
    pub fn state(&self, id: OperationId) -> Option<OperationState> {
        self.active
            .get(&id)
            .or_else(|| self.settled.iter().find(|op| op.id == id))
            .map(|op| op.state)
    }
}
