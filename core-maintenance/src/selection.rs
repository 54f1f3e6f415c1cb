//! Candidate selection and sort ordering for a candidate table.

use crate::types::CandidateId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortColumn {
    Title,
    Size,
    Year,
    AddedAt,
}

impl SortColumn {
    /// Direction applied on the first click.
    pub fn default_direction(&self) -> SortDirection {
        match self {
            SortColumn::Title => SortDirection::Asc,
            SortColumn::Size | SortColumn::Year | SortColumn::AddedAt => SortDirection::Desc,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortColumn::Title => "title",
            SortColumn::Size => "size",
            SortColumn::Year => "year",
            SortColumn::AddedAt => "added_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn reversed(&self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortState {
    pub column: SortColumn,
    pub direction: SortDirection,
}

impl SortState {
    pub fn default_for(column: SortColumn) -> Self {
        Self {
            column,
            direction: column.default_direction(),
        }
    }

    /// Next sort after a click on `column`.
    ///
    /// A new column starts at its default direction, a second click reverses
    /// it and a third click removes sorting.
    pub fn cycle(current: Option<SortState>, column: SortColumn) -> Option<SortState> {
        match current {
            Some(state) if state.column == column => {
                if state.direction == column.default_direction() {
                    Some(SortState {
                        column,
                        direction: state.direction.reversed(),
                    })
                } else {
                    None
                }
            }
            _ => Some(Self::default_for(column)),
        }
    }
}

/// Candidate ids selected on the visible page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateSelection {
    ids: BTreeSet<CandidateId>,
}

impl CandidateSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the id is selected after the call.
    pub fn toggle(&mut self, id: CandidateId) -> bool {
        if self.ids.remove(&id) {
            false
        } else {
            self.ids.insert(id);
            true
        }
    }

    pub fn select(&mut self, id: CandidateId) {
        self.ids.insert(id);
    }

    pub fn deselect(&mut self, id: CandidateId) {
        self.ids.remove(&id);
    }

    pub fn select_all(&mut self, ids: impl IntoIterator<Item = CandidateId>) {
        self.ids.extend(ids);
    }

    /// Drops every id that `keep` rejects.
    pub fn retain(&mut self, keep: impl Fn(CandidateId) -> bool) {
        self.ids.retain(|id| keep(*id));
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn contains(&self, id: CandidateId) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> Vec<CandidateId> {
        self.ids.iter().copied().collect()
    }
}
