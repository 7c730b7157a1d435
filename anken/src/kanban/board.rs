//! Kanban board state
//!
//! Holds the in-memory statuses and projects for one user, applies
//! optimistic patches for drag-and-drop gestures and reconciles with the
//! store once each operation settles. Subscribers receive a [`BoardEvent`]
//! whenever the visible state changes.

use crate::cache::{elapsed, Clock};
use crate::config::{EVENT_CHANNEL_CAPACITY, MAX_RELOAD_ATTEMPTS};
use crate::database::{Project, SortUpdate, Status};
use crate::error::{AppError, Result};
use crate::kanban::operation::{OperationId, OperationKind, OperationState, OperationTracker};
use crate::kanban::ordering::{
    column_cards, plan_column_move, plan_move, renumber_column, CardPosition, DropTarget, MovePlan,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

/// Statuses and projects as loaded from the store
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BoardSnapshot {
    pub statuses: Vec<Status>,
    pub projects: Vec<Project>,
}

/// Persistence used by the board
#[async_trait]
pub trait BoardStore: Send + Sync {
    /// Load the board. `fresh` bypasses any cached result.
    async fn load_board(&self, user_id: &str, fresh: bool) -> Result<BoardSnapshot>;

    /// Persist a card move and its displaced siblings atomically
    async fn apply_move(&self, user_id: &str, plan: &MovePlan) -> Result<()>;

    async fn reorder_projects(&self, user_id: &str, updates: &[SortUpdate]) -> Result<()>;

    async fn reorder_statuses(&self, user_id: &str, updates: &[SortUpdate]) -> Result<()>;
}

/// One column with its cards in display order
#[derive(Debug, Clone, Serialize)]
pub struct Column {
    pub status: Status,
    pub cards: Vec<Project>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BoardEvent {
    Reloaded { revision: u64 },
    OperationApplied { operation: OperationId },
    OperationCommitted { operation: OperationId },
    OperationRolledBack { operation: OperationId, error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Fresh data replaced the board
    Applied,
    /// Skipped: the last load is younger than the reload interval
    Throttled,
    /// Skipped: another load is running
    InFlight,
    /// Fetched but discarded because an operation is pending
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The gesture resolved to no change; nothing was persisted
    Unchanged,
    Moved(MovePlan),
}

#[derive(Debug, Default)]
struct BoardState {
    snapshot: BoardSnapshot,
    /// Bumped on every local change so racing reloads can be detected
    revision: u64,
    loaded_at: Option<DateTime<Utc>>,
}

impl BoardState {
    fn column_ids(&self) -> Vec<&str> {
        self.snapshot.statuses.iter().map(|s| s.id.as_str()).collect()
    }

    fn cards(&self) -> Vec<CardPosition> {
        self.snapshot.projects.iter().map(CardPosition::from).collect()
    }

    fn sort_statuses(&mut self) {
        self.snapshot.statuses.sort_by_key(|s| s.sort_order);
    }
}

/// Previous values of everything an optimistic patch touched
enum Undo {
    Cards(Vec<CardPosition>),
    Columns(Vec<SortUpdate>),
}

/// New position for one card. `status_id: None` keeps the current status.
struct CardChange<'a> {
    id: &'a str,
    status_id: Option<&'a str>,
    sort_order: i64,
}

/// The board's load slot. Dropping it frees the slot and re-queues a
/// reconciliation it was still serving.
struct LoadGuard {
    loading: Arc<AtomicBool>,
    reload_requested: Arc<AtomicBool>,
    serving_request: bool,
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        if self.serving_request {
            self.reload_requested.store(true, Ordering::SeqCst);
        }
        self.loading.store(false, Ordering::SeqCst);
    }
}

/// Run `work` on its own task so it settles even if the caller stops waiting
async fn run_to_completion<T, F>(work: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(work)
        .await
        .map_err(|e| AppError::Generic(format!("Board operation task failed: {}", e)))?
}

/// Board for one signed-in user
#[derive(Clone)]
pub struct Board {
    user_id: Arc<str>,
    store: Arc<dyn BoardStore>,
    clock: Arc<dyn Clock>,
    reload_interval: Duration,
    state: Arc<RwLock<BoardState>>,
    operations: Arc<Mutex<OperationTracker>>,
    loading: Arc<AtomicBool>,
    reload_requested: Arc<AtomicBool>,
    events: broadcast::Sender<BoardEvent>,
}

impl Board {
    pub fn new(
        user_id: &str,
        store: Arc<dyn BoardStore>,
        clock: Arc<dyn Clock>,
        reload_interval: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            user_id: Arc::from(user_id),
            store,
            clock,
            reload_interval,
            state: Arc::new(RwLock::new(BoardState::default())),
            operations: Arc::new(Mutex::new(OperationTracker::new())),
            loading: Arc::new(AtomicBool::new(false)),
            reload_requested: Arc::new(AtomicBool::new(false)),
            events,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BoardEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> BoardSnapshot {
        self.state.read().await.snapshot.clone()
    }

    pub async fn revision(&self) -> u64 {
        self.state.read().await.revision
    }

    /// Columns in order, each with its cards in display order.
    ///
    /// Cards without a known status are shown in the first column.
    pub async fn columns(&self) -> Vec<Column> {
        let state = self.state.read().await;
        let cards = state.cards();
        let column_ids = state.column_ids();
        let by_id: HashMap<&str, &Project> = state
            .snapshot
            .projects
            .iter()
            .map(|p| (p.id.as_str(), p))
            .collect();

        state
            .snapshot
            .statuses
            .iter()
            .map(|status| Column {
                status: status.clone(),
                cards: column_cards(&cards, &column_ids, &status.id)
                    .into_iter()
                    .filter_map(|card| by_id.get(card.id.as_str()).map(|p| (*p).clone()))
                    .collect(),
            })
            .collect()
    }

    pub fn operation_state(&self, operation: OperationId) -> Option<OperationState> {
        self.tracker().state(operation)
    }

    pub fn pending_operations(&self) -> usize {
        self.tracker().pending_count()
    }

    /// Load the board from the store.
    ///
    /// A non-forced load within the reload interval of the last successful
    /// load is throttled, and a load while another is running is skipped.
    pub async fn load(&self, force: bool) -> Result<LoadOutcome> {
        if !force && self.is_fresh().await {
            tracing::debug!("Board reload throttled for user {}", self.user_id);
            return Ok(LoadOutcome::Throttled);
        }

        let Some(guard) = self.try_begin_load() else {
            tracing::debug!("Board reload already in flight, skipping");
            return Ok(LoadOutcome::InFlight);
        };

        let result = self.fetch_and_apply(force).await;

        if let Some(Err(e)) = self.drain_reload_requests(guard).await {
            tracing::warn!("Queued board reconciliation failed: {}", e);
        }

        result
    }

    /// Reload after an operation settled.
    ///
    /// Ignores the throttle. If a load is already running the request is
    /// recorded and served by that load before it releases the guard.
    pub async fn reconcile(&self) -> Result<LoadOutcome> {
        self.reload_requested.store(true, Ordering::SeqCst);

        let Some(guard) = self.try_begin_load() else {
            tracing::debug!("Board reconciliation queued behind running load");
            return Ok(LoadOutcome::InFlight);
        };

        self.drain_reload_requests(guard)
            .await
            .unwrap_or(Ok(LoadOutcome::InFlight))
    }

    /// Move a card in response to a drop.
    ///
    /// The board reflects the move immediately. If persisting fails the
    /// patch is reverted, the board is reloaded and the failure returned
    /// as [`AppError::MoveFailed`]. Once started, the move settles even if
    /// the returned future is dropped.
    pub async fn move_card(&self, dragged_id: &str, target: &DropTarget) -> Result<MoveOutcome> {
        let plan = {
            let state = self.state.read().await;
            plan_move(&state.cards(), &state.column_ids(), dragged_id, target)
        };

        let Some(plan) = plan else {
            tracing::debug!("Drop of {} onto {:?} changes nothing", dragged_id, target);
            return Ok(MoveOutcome::Unchanged);
        };

        match run_to_completion(self.clone().apply_card_move(plan.clone())).await {
            Ok(()) => Ok(MoveOutcome::Moved(plan)),
            Err(e) => Err(AppError::MoveFailed {
                project_id: plan.project_id.clone(),
                source: Box::new(e),
            }),
        }
    }

    async fn apply_card_move(self, plan: MovePlan) -> Result<()> {
        let operation = self.tracker().begin(OperationKind::MoveCard(plan.clone()));

        let mut changes = vec![CardChange {
            id: &plan.project_id,
            status_id: Some(&plan.to_status),
            sort_order: plan.sort_order,
        }];
        changes.extend(plan.displaced.iter().map(|update| CardChange {
            id: &update.id,
            status_id: None,
            sort_order: update.sort_order,
        }));
        let undo = self.patch_cards(&changes).await;
        self.emit(BoardEvent::OperationApplied { operation });

        tracing::info!(
            "Moving project {} to status {} at {}",
            plan.project_id,
            plan.to_status,
            plan.sort_order
        );

        let persisted = self.store.apply_move(&self.user_id, &plan).await;
        self.settle(operation, persisted, undo).await
    }

    /// Move a column onto another column's position.
    ///
    /// Returns `false` when nothing changes.
    pub async fn move_column(&self, dragged_id: &str, target_id: &str) -> Result<bool> {
        let updates = {
            let state = self.state.read().await;
            plan_column_move(&state.snapshot.statuses, dragged_id, target_id)
        };

        let Some(updates) = updates.filter(|u| !u.is_empty()) else {
            return Ok(false);
        };

        tracing::info!("Moving status {} to the position of {}", dragged_id, target_id);

        run_to_completion(self.clone().apply_column_move(updates)).await?;
        Ok(true)
    }

    async fn apply_column_move(self, updates: Vec<SortUpdate>) -> Result<()> {
        let operation = self.tracker().begin(OperationKind::MoveColumn {
            updates: updates.clone(),
        });
        let undo = self.patch_columns(&updates).await;
        self.emit(BoardEvent::OperationApplied { operation });

        let persisted = self.store.reorder_statuses(&self.user_id, &updates).await;
        self.settle(operation, persisted, undo).await
    }

    /// Renumber a column's cards to `index * SORT_STEP`.
    ///
    /// Returns the number of cards whose position changed.
    pub async fn compact_column(&self, status_id: &str) -> Result<usize> {
        let updates = {
            let state = self.state.read().await;
            if !state.snapshot.statuses.iter().any(|s| s.id == status_id) {
                return Err(AppError::not_found("Status", status_id));
            }
            renumber_column(&state.cards(), &state.column_ids(), status_id)
        };

        if updates.is_empty() {
            return Ok(0);
        }

        let moved = updates.len();
        run_to_completion(self.clone().apply_compaction(status_id.to_string(), updates)).await?;

        tracing::info!("Compacted {} cards in status {}", moved, status_id);
        Ok(moved)
    }

    async fn apply_compaction(self, status_id: String, updates: Vec<SortUpdate>) -> Result<()> {
        let operation = self.tracker().begin(OperationKind::CompactColumn {
            status_id,
            updates: updates.clone(),
        });

        let changes: Vec<CardChange> = updates
            .iter()
            .map(|update| CardChange {
                id: &update.id,
                status_id: None,
                sort_order: update.sort_order,
            })
            .collect();
        let undo = self.patch_cards(&changes).await;
        self.emit(BoardEvent::OperationApplied { operation });

        let persisted = self.store.reorder_projects(&self.user_id, &updates).await;
        self.settle(operation, persisted, undo).await
    }

    async fn settle(&self, operation: OperationId, persisted: Result<()>, undo: Undo) -> Result<()> {
        match persisted {
            Ok(()) => {
                self.tracker().commit(operation)?;
                self.emit(BoardEvent::OperationCommitted { operation });
                self.reconcile_logged().await;
                Ok(())
            }
            Err(e) => {
                tracing::error!("Operation {} failed, rolling back: {}", operation, e);

                // Revert before settling so no reload can land in between
                self.restore(undo).await;
                self.tracker().roll_back(operation)?;
                self.emit(BoardEvent::OperationRolledBack {
                    operation,
                    error: e.to_string(),
                });
                self.reconcile_logged().await;
                Err(e)
            }
        }
    }

    async fn reconcile_logged(&self) {
        match self.reconcile().await {
            Ok(outcome) => tracing::debug!("Board reconciliation: {:?}", outcome),
            Err(e) => tracing::error!("Board reconciliation failed: {}", e),
        }
    }

    async fn patch_cards(&self, changes: &[CardChange<'_>]) -> Undo {
        let mut state = self.state.write().await;
        let mut previous = Vec::with_capacity(changes.len());

        for project in state.snapshot.projects.iter_mut() {
            if let Some(change) = changes.iter().find(|c| c.id == project.id) {
                previous.push(CardPosition::from(&*project));
                if let Some(status_id) = change.status_id {
                    project.status_id = Some(status_id.to_string());
                }
                project.sort_order = change.sort_order;
            }
        }

        state.revision += 1;
        Undo::Cards(previous)
    }

    async fn patch_columns(&self, updates: &[SortUpdate]) -> Undo {
        let mut state = self.state.write().await;
        let mut previous = Vec::with_capacity(updates.len());

        for status in state.snapshot.statuses.iter_mut() {
            if let Some(update) = updates.iter().find(|u| u.id == status.id) {
                previous.push(SortUpdate::new(status.id.clone(), status.sort_order));
                status.sort_order = update.sort_order;
            }
        }

        state.sort_statuses();
        state.revision += 1;
        Undo::Columns(previous)
    }

    async fn restore(&self, undo: Undo) {
        let mut state = self.state.write().await;

        match undo {
            Undo::Cards(previous) => {
                for card in previous {
                    if let Some(project) = state.snapshot.projects.iter_mut().find(|p| p.id == card.id) {
                        project.status_id = card.status_id;
                        project.sort_order = card.sort_order;
                    }
                }
            }
            Undo::Columns(previous) => {
                for update in previous {
                    if let Some(status) = state.snapshot.statuses.iter_mut().find(|s| s.id == update.id) {
                        status.sort_order = update.sort_order;
                    }
                }
                state.sort_statuses();
            }
        }

        state.revision += 1;
    }

    async fn is_fresh(&self) -> bool {
        let loaded_at = self.state.read().await.loaded_at;
        match loaded_at {
            Some(at) => !elapsed(at, self.clock.now(), self.reload_interval),
            None => false,
        }
    }

    fn try_begin_load(&self) -> Option<LoadGuard> {
        self.loading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;

        Some(LoadGuard {
            loading: self.loading.clone(),
            reload_requested: self.reload_requested.clone(),
            serving_request: false,
        })
    }

    /// Serve queued reconciliations, then release the load guard.
    ///
    /// Returns the result of the last reload it ran, if any.
    async fn drain_reload_requests(&self, guard: LoadGuard) -> Option<Result<LoadOutcome>> {
        let mut last = None;
        let mut slot = Some(guard);

        while let Some(mut guard) = slot.take() {
            while self.reload_requested.swap(false, Ordering::SeqCst) {
                guard.serving_request = true;
                last = Some(self.fetch_and_apply(true).await);
                guard.serving_request = false;
            }

            drop(guard);

            // A request may have arrived between the last swap and the release
            if self.reload_requested.load(Ordering::SeqCst) {
                slot = self.try_begin_load();
            }
        }

        last
    }

    async fn fetch_and_apply(&self, fresh: bool) -> Result<LoadOutcome> {
        for attempt in 1..=MAX_RELOAD_ATTEMPTS {
            let started_at = self.state.read().await.revision;

            let mut snapshot = self
                .store
                .load_board(&self.user_id, fresh || attempt > 1)
                .await?;

            let mut state = self.state.write().await;

            if self.pending_operations() > 0 {
                tracing::debug!("Discarding board reload: operations pending");
                return Ok(LoadOutcome::Deferred);
            }

            if state.revision != started_at {
                tracing::debug!("Board changed during reload (attempt {}), refetching", attempt);
                continue;
            }

            snapshot.statuses.sort_by_key(|s| s.sort_order);
            state.snapshot = snapshot;
            state.revision += 1;
            state.loaded_at = Some(self.clock.now());
            let revision = state.revision;
            drop(state);

            tracing::info!("Board reloaded for user {} (revision {})", self.user_id, revision);
            self.emit(BoardEvent::Reloaded { revision });
            return Ok(LoadOutcome::Applied);
        }

        tracing::warn!(
            "Board reload gave up after {} attempts; local changes kept racing",
            MAX_RELOAD_ATTEMPTS
        );
        Ok(LoadOutcome::Deferred)
    }

    fn tracker(&self) -> MutexGuard<'_, OperationTracker> {
        self.operations.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: BoardEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
