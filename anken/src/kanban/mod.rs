//! Kanban board: ordering, optimistic operations and board state

pub mod board;
pub mod operation;
pub mod ordering;

pub use board::{Board, BoardEvent, BoardSnapshot, BoardStore, Column, LoadOutcome, MoveOutcome};
pub use operation::{OperationId, OperationKind, OperationState, OperationTracker};
pub use ordering::{CardPosition, DropTarget, MovePlan};
