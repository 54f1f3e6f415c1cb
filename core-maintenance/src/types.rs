//! Domain models exchanged with the monitor backend.
//!
//! Wire names are snake_case; optional fields default when absent so that
//! older backends which omit them still decode.

use crate::selection::SortState;
use crate::sync_key::SyncKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

pub type RuleId = i64;
pub type CandidateId = i64;
pub type LibraryItemId = i64;
pub type ServerId = i64;

/// A library on one media server, as referenced by a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryRef {
    pub server_id: ServerId,
    pub library_id: String,
    pub library_name: String,
}

impl LibraryRef {
    pub fn new(
        server_id: ServerId,
        library_id: impl Into<String>,
        library_name: impl Into<String>,
    ) -> Self {
        Self {
            server_id,
            library_id: library_id.into(),
            library_name: library_name.into(),
        }
    }

    pub fn sync_key(&self) -> SyncKey {
        SyncKey::new(self.server_id, self.library_id.clone())
    }
}

/// A maintenance rule and the libraries it evaluates.
///
/// Several rules may reference the same library; the launcher deduplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    #[serde(default)]
    pub libraries: Vec<LibraryRef>,
}

impl Rule {
    /// Display name of the library behind `key`, falling back to the key itself.
    pub fn library_name(&self, key: &SyncKey) -> String {
        self.libraries
            .iter()
            .find(|lib| lib.server_id == key.server_id() && lib.library_id == key.library_id())
            .map(|lib| lib.library_name.clone())
            .unwrap_or_else(|| key.to_string())
    }
}

/// A media item as indexed by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryItem {
    pub id: LibraryItemId,
    pub server_id: ServerId,
    pub library_id: String,
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub added_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tmdb_id: Option<i64>,
    #[serde(default)]
    pub tvdb_id: Option<i64>,
    #[serde(default)]
    pub imdb_id: Option<String>,
}

/// An item flagged by a rule, with the reason it was flagged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub rule_id: RuleId,
    pub item: LibraryItem,
    pub reason: String,
}

/// One page of candidates plus aggregates over the whole filtered set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePage {
    pub items: Vec<Candidate>,
    pub total: u64,
    #[serde(default)]
    pub total_size: u64,
}

/// Visible page, filter and sort of a candidate table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateQuery {
    /// 1-based page number
    pub page: u32,
    pub per_page: u32,
    pub search: Option<String>,
    pub sort: Option<SortState>,
}

impl CandidateQuery {
    pub fn new(per_page: u32) -> Self {
        Self {
            page: 1,
            per_page,
            search: None,
            sort: None,
        }
    }
}

// ============================================================================
// Sync status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Items,
    History,
    Done,
    Error,
}

impl SyncPhase {
    pub fn is_active(&self) -> bool {
        matches!(self, SyncPhase::Items | SyncPhase::History)
    }
}

/// Backend view of one running sync job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJobState {
    pub phase: SyncPhase,
    #[serde(default)]
    pub current: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// All in-flight sync jobs keyed by their encoded [`SyncKey`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncStatusSnapshot {
    jobs: HashMap<String, SyncJobState>,
}

impl SyncStatusSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &SyncKey, state: SyncJobState) {
        self.jobs.insert(key.encode(), state);
    }

    pub fn get(&self, key: &SyncKey) -> Option<&SyncJobState> {
        self.jobs.get(&key.encode())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl FromIterator<(SyncKey, SyncJobState)> for SyncStatusSnapshot {
    fn from_iter<I: IntoIterator<Item = (SyncKey, SyncJobState)>>(iter: I) -> Self {
        Self {
            jobs: iter
                .into_iter()
                .map(|(key, state)| (key.encode(), state))
                .collect(),
        }
    }
}

// ============================================================================
// Deletion
// ============================================================================

/// Streamed progress of a bulk delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteProgress {
    #[serde(default, alias = "processed")]
    pub current: u64,
    pub total: u64,
    #[serde(default)]
    pub deleted: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub skipped: u64,
    #[serde(default, alias = "reclaimed_size")]
    pub reclaimed_bytes: u64,
}

impl DeleteProgress {
    /// Zeroed progress for a request of `total` items.
    pub fn new(total: u64) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub title: String,
    pub error: String,
}

/// Terminal frame of a bulk delete stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkDeleteResult {
    pub deleted: u64,
    pub failed: u64,
    pub skipped: u64,
    #[serde(default)]
    pub total_size: u64,
    #[serde(default)]
    pub errors: Vec<ItemError>,
}

/// A library item on another server believed to be the same title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossServerMatch {
    pub item_id: LibraryItemId,
    pub server_id: ServerId,
    pub server_name: String,
    pub library_id: String,
    pub library_name: String,
    pub title: String,
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

/// Identifies one deletion run in events and spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeleteRunId(Uuid);

impl DeleteRunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeleteRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeleteRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_decodes_backend_map() {
        let body = r#"{
            "1:movies": {"phase": "items", "current": 12, "total": 340},
            "2:shows": {"phase": "error", "error": "server unreachable"}
        }"#;

        let snapshot: SyncStatusSnapshot = serde_json::from_str(body).unwrap();
        assert_eq!(snapshot.len(), 2);

        let movies = snapshot.get(&SyncKey::new(1, "movies")).unwrap();
        assert_eq!(movies.phase, SyncPhase::Items);
        assert_eq!(movies.current, Some(12));
        assert_eq!(movies.total, Some(340));

        let shows = snapshot.get(&SyncKey::new(2, "shows")).unwrap();
        assert_eq!(shows.phase, SyncPhase::Error);
        assert_eq!(shows.error.as_deref(), Some("server unreachable"));
    }

    #[test]
    fn test_phase_activity() {
        assert!(SyncPhase::Items.is_active());
        assert!(SyncPhase::History.is_active());
        assert!(!SyncPhase::Done.is_active());
        assert!(!SyncPhase::Error.is_active());
    }

    #[test]
    fn test_bulk_delete_result_defaults_errors() {
        let result: BulkDeleteResult =
            serde_json::from_str(r#"{"deleted":2,"failed":0,"skipped":1,"total_size":2048}"#)
                .unwrap();
        assert_eq!(result.deleted, 2);
        assert_eq!(result.skipped, 1);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_progress_accepts_processed_alias() {
        let progress: DeleteProgress =
            serde_json::from_str(r#"{"processed":3,"total":5,"deleted":3}"#).unwrap();
        assert_eq!(progress.current, 3);
        assert_eq!(progress.total, 5);
        assert_eq!(progress.reclaimed_bytes, 0);
    }

    #[test]
    fn test_rule_library_name_lookup() {
        let rule = Rule {
            id: 1,
            name: "Old movies".to_string(),
            libraries: vec![LibraryRef::new(1, "movies", "Movies")],
        };

        assert_eq!(rule.library_name(&SyncKey::new(1, "movies")), "Movies");
        assert_eq!(rule.library_name(&SyncKey::new(9, "x")), "9:x");
    }

    #[test]
    fn test_delete_run_ids_are_unique() {
        assert_ne!(DeleteRunId::new(), DeleteRunId::new());
    }
}
