//! Card and column ordering
//!
//! Pure functions that turn a drag-and-drop gesture into the positions to
//! persist. Card positions are multiples of [`SORT_STEP`] scoped to their
//! column; column positions are dense indices.

use crate::config::SORT_STEP;
use crate::database::{Project, SortUpdate, Status};
use serde::{Deserialize, Serialize};

/// The ordering-relevant part of a card
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardPosition {
    pub id: String,
    pub status_id: Option<String>,
    pub sort_order: i64,
}

impl From<&Project> for CardPosition {
    fn from(project: &Project) -> Self {
        Self {
            id: project.id.clone(),
            status_id: project.status_id.clone(),
            sort_order: project.sort_order,
        }
    }
}

/// Where a dragged card was released
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum DropTarget {
    /// Over another card: take that card's place
    Card(String),
    /// Over the empty area of a column: append
    Column(String),
}

/// Positions to persist for one card move
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovePlan {
    pub project_id: String,
    pub from_status: Option<String>,
    pub to_status: String,
    pub sort_order: i64,
    /// Siblings in the destination column whose position changes
    pub displaced: Vec<SortUpdate>,
}

impl MovePlan {
    pub fn changes_column(&self) -> bool {
        self.from_status.as_deref() != Some(self.to_status.as_str())
    }
}

/// Column a card is displayed in. Cards without a known status land in
/// the first column.
pub fn display_column<'a>(card: &CardPosition, column_ids: &[&'a str]) -> Option<&'a str> {
    card.status_id
        .as_deref()
        .and_then(|status| column_ids.iter().copied().find(|c| *c == status))
        .or_else(|| column_ids.first().copied())
}

/// Cards displayed in `column`, in visual order.
///
/// Sorting is stable, so equal positions keep their order in `cards`.
pub fn column_cards<'c>(
    cards: &'c [CardPosition],
    column_ids: &[&str],
    column: &str,
) -> Vec<&'c CardPosition> {
    let mut siblings: Vec<&CardPosition> = cards
        .iter()
        .filter(|card| display_column(card, column_ids) == Some(column))
        .collect();
    siblings.sort_by_key(|card| card.sort_order);
    siblings
}

/// Resolve a drop into a move plan.
///
/// Returns `None` when the gesture changes nothing: a drop onto the dragged
/// card itself, onto its current index, onto its own column's empty area,
/// or onto anything unknown.
pub fn plan_move(
    cards: &[CardPosition],
    column_ids: &[&str],
    dragged_id: &str,
    target: &DropTarget,
) -> Option<MovePlan> {
    let dragged = cards.iter().find(|card| card.id == dragged_id)?;
    let source_column = display_column(dragged, column_ids)?;

    match target {
        DropTarget::Card(target_id) => {
            if target_id == dragged_id {
                return None;
            }

            let target_card = cards.iter().find(|card| &card.id == target_id)?;
            let dest_column = display_column(target_card, column_ids)?;

            let mut order = column_cards(cards, column_ids, dest_column);
            let target_index = order.iter().position(|card| &card.id == target_id)?;

            if dest_column == source_column {
                let source_index = order.iter().position(|card| card.id == dragged_id)?;
                if source_index == target_index {
                    return None;
                }
                order.remove(source_index);
            }
            order.insert(target_index, dragged);

            let displaced = order
                .iter()
                .enumerate()
                .filter(|(_, card)| card.id != dragged_id)
                .filter_map(|(index, card)| {
                    let position = index as i64 * SORT_STEP;
                    (card.sort_order != position).then(|| SortUpdate::new(card.id.clone(), position))
                })
                .collect();

            Some(MovePlan {
                project_id: dragged.id.clone(),
                from_status: dragged.status_id.clone(),
                to_status: dest_column.to_string(),
                sort_order: target_index as i64 * SORT_STEP,
                displaced,
            })
        }
        DropTarget::Column(column_id) => {
            let dest_column = column_ids
                .iter()
                .copied()
                .find(|c| *c == column_id.as_str())?;
            if dragged.status_id.as_deref() == Some(dest_column) {
                return None;
            }

            let sibling_count = column_cards(cards, column_ids, dest_column)
                .iter()
                .filter(|card| card.id != dragged_id)
                .count();

            Some(MovePlan {
                project_id: dragged.id.clone(),
                from_status: dragged.status_id.clone(),
                to_status: dest_column.to_string(),
                sort_order: sibling_count as i64 * SORT_STEP,
                displaced: Vec::new(),
            })
        }
    }
}

/// Compact a column back to `index * SORT_STEP`, returning only the
/// positions that change.
pub fn renumber_column(cards: &[CardPosition], column_ids: &[&str], column: &str) -> Vec<SortUpdate> {
    column_cards(cards, column_ids, column)
        .into_iter()
        .enumerate()
        .filter_map(|(index, card)| {
            let position = index as i64 * SORT_STEP;
            (card.sort_order != position).then(|| SortUpdate::new(card.id.clone(), position))
        })
        .collect()
}

/// Move a column onto another column's index and renumber densely.
///
/// `statuses` must already be in display order. Returns `None` when the
/// move changes nothing.
pub fn plan_column_move(statuses: &[Status], dragged_id: &str, target_id: &str) -> Option<Vec<SortUpdate>> {
    if dragged_id == target_id {
        return None;
    }

    let source_index = statuses.iter().position(|s| s.id == dragged_id)?;
    let target_index = statuses.iter().position(|s| s.id == target_id)?;

    let mut order: Vec<&Status> = statuses.iter().collect();
    let dragged = order.remove(source_index);
    order.insert(target_index, dragged);

    let updates: Vec<SortUpdate> = order
        .iter()
        .enumerate()
        .filter(|(index, status)| status.sort_order != *index as i64)
        .map(|(index, status)| SortUpdate::new(status.id.clone(), index as i64))
        .collect();

    Some(updates)
}
