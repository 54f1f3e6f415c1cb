//! Backend contract consumed by the maintenance components.
//!
//! Components depend on `Arc<dyn MaintenanceApi>` so tests can substitute a
//! recording double for the HTTP implementation in [`crate::http_api`].

use crate::error::Result;
use crate::sync_key::SyncKey;
use crate::types::{
    Candidate, CandidateId, CandidatePage, CandidateQuery, CrossServerMatch, LibraryItemId,
    RuleId, SyncStatusSnapshot,
};
use async_trait::async_trait;
use bridge_traits::ByteStream;

/// Result of asking the backend to sync one library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartSyncOutcome {
    /// A new job was started.
    Started,
    /// A job for the same key was already running; the caller joins it.
    AlreadyRunning,
}

#[async_trait]
pub trait MaintenanceApi: Send + Sync {
    /// Starts a sync for one (server, library) pair.
    async fn start_sync(&self, key: &SyncKey) -> Result<StartSyncOutcome>;

    /// One snapshot covering every sync job currently in flight.
    async fn sync_status(&self) -> Result<SyncStatusSnapshot>;

    async fn list_candidates(&self, rule_id: RuleId, query: &CandidateQuery)
        -> Result<CandidatePage>;

    /// Submits a batch delete and returns the server-sent event body.
    ///
    /// Non-2xx responses are returned as `MaintenanceError::Api`.
    async fn bulk_delete(&self, rule_id: RuleId, candidate_ids: &[CandidateId])
        -> Result<ByteStream>;

    /// Items sharing the candidate's external identity, including the
    /// candidate's own item.
    async fn cross_server_matches(&self, candidate: &Candidate) -> Result<Vec<CrossServerMatch>>;

    /// Deletes one library item. `verify_against` names the source item a
    /// cross-server match must still correspond to.
    async fn delete_library_item(
        &self,
        item_id: LibraryItemId,
        verify_against: Option<LibraryItemId>,
    ) -> Result<()>;
}
