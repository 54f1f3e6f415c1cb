//! Recording backend double shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::{BridgeError, ByteStream};
use bytes::Bytes;
use core_maintenance::{
    Candidate, CandidateId, CandidatePage, CandidateQuery, CrossServerMatch, LibraryItem,
    LibraryItemId, MaintenanceApi, MaintenanceError, Result, RuleId, StartSyncOutcome, SyncKey,
    SyncStatusSnapshot,
};
use core_runtime::events::{CoreEvent, EventBus};
use futures::channel::mpsc;
use futures::stream;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

/// One backend call, in the order it was issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    StartSync(String),
    SyncStatus,
    ListCandidates(RuleId),
    BulkDelete(RuleId, Vec<CandidateId>),
    Matches(LibraryItemId),
    Delete {
        item_id: LibraryItemId,
        verify_against: Option<LibraryItemId>,
    },
}

/// Scripted reply to a bulk delete.
pub enum DeleteBody {
    Chunks(Vec<&'static str>),
    Channel(mpsc::UnboundedReceiver<std::result::Result<Bytes, BridgeError>>),
    Status(u16),
}

#[derive(Default)]
pub struct RecordingApi {
    calls: Mutex<Vec<Call>>,
    start_statuses: Mutex<HashMap<String, u16>>,
    /// `None` answers with a 503. The last entry is repeated.
    snapshots: Mutex<VecDeque<Option<SyncStatusSnapshot>>>,
    candidates: Mutex<Vec<Candidate>>,
    delete_bodies: Mutex<VecDeque<DeleteBody>>,
    matches: Mutex<Vec<CrossServerMatch>>,
    failing_items: Mutex<HashSet<LibraryItemId>>,
}

impl RecordingApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_start(&self, key: &str, status: u16) {
        self.start_statuses
            .lock()
            .unwrap()
            .insert(key.to_string(), status);
    }

    pub fn push_snapshot(&self, snapshot: Option<SyncStatusSnapshot>) {
        self.snapshots.lock().unwrap().push_back(snapshot);
    }

    pub fn set_candidates(&self, candidates: Vec<Candidate>) {
        *self.candidates.lock().unwrap() = candidates;
    }

    pub fn push_delete_body(&self, body: DeleteBody) {
        self.delete_bodies.lock().unwrap().push_back(body);
    }

    pub fn set_matches(&self, matches: Vec<CrossServerMatch>) {
        *self.matches.lock().unwrap() = matches;
    }

    pub fn fail_item(&self, item_id: LibraryItemId) {
        self.failing_items.lock().unwrap().insert(item_id);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn status_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::SyncStatus))
            .count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl MaintenanceApi for RecordingApi {
    async fn start_sync(&self, key: &SyncKey) -> Result<StartSyncOutcome> {
        self.record(Call::StartSync(key.encode()));
        match self.start_statuses.lock().unwrap().get(&key.encode()) {
            None => Ok(StartSyncOutcome::Started),
            Some(&status) => Err(MaintenanceError::Api {
                status,
                message: format!("start rejected with {}", status),
            }),
        }
    }

    async fn sync_status(&self) -> Result<SyncStatusSnapshot> {
        self.record(Call::SyncStatus);
        let mut snapshots = self.snapshots.lock().unwrap();
        let next = if snapshots.len() > 1 {
            snapshots.pop_front().flatten()
        } else {
            snapshots.front().cloned().flatten()
        };
        let empty = snapshots.is_empty();
        drop(snapshots);

        match next {
            Some(snapshot) => Ok(snapshot),
            None if empty => Ok(SyncStatusSnapshot::new()),
            None => Err(MaintenanceError::Api {
                status: 503,
                message: "status unavailable".to_string(),
            }),
        }
    }

    async fn list_candidates(&self, rule_id: RuleId, _query: &CandidateQuery) -> Result<CandidatePage> {
        self.record(Call::ListCandidates(rule_id));
        let items = self.candidates.lock().unwrap().clone();
        Ok(CandidatePage {
            total: items.len() as u64,
            total_size: items.iter().filter_map(|c| c.item.size_bytes).sum(),
            items,
        })
    }

    async fn bulk_delete(&self, rule_id: RuleId, candidate_ids: &[CandidateId]) -> Result<ByteStream> {
        self.record(Call::BulkDelete(rule_id, candidate_ids.to_vec()));
        let body = self
            .delete_bodies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(DeleteBody::Chunks(vec![]));

        match body {
            DeleteBody::Chunks(chunks) => {
                let chunks: Vec<std::result::Result<Bytes, BridgeError>> = chunks
                    .into_iter()
                    .map(|c| Ok(Bytes::from_static(c.as_bytes())))
                    .collect();
                Ok(Box::pin(stream::iter(chunks)))
            }
            DeleteBody::Channel(receiver) => Ok(Box::pin(receiver)),
            DeleteBody::Status(status) => Err(MaintenanceError::Api {
                status,
                message: "delete rejected".to_string(),
            }),
        }
    }

    async fn cross_server_matches(&self, candidate: &Candidate) -> Result<Vec<CrossServerMatch>> {
        self.record(Call::Matches(candidate.item.id));
        Ok(self.matches.lock().unwrap().clone())
    }

    async fn delete_library_item(
        &self,
        item_id: LibraryItemId,
        verify_against: Option<LibraryItemId>,
    ) -> Result<()> {
        self.record(Call::Delete {
            item_id,
            verify_against,
        });
        if self.failing_items.lock().unwrap().contains(&item_id) {
            return Err(MaintenanceError::Api {
                status: 502,
                message: format!("server for item {} is unreachable", item_id),
            });
        }
        Ok(())
    }
}

pub fn candidate(id: CandidateId, rule_id: RuleId, item_id: LibraryItemId) -> Candidate {
    Candidate {
        id,
        rule_id,
        item: LibraryItem {
            id: item_id,
            server_id: 1,
            library_id: "movies".to_string(),
            title: format!("Movie {}", id),
            year: Some(1999),
            size_bytes: Some(1024 * 1024),
            added_at: None,
            tmdb_id: Some(603),
            tvdb_id: None,
            imdb_id: None,
        },
        reason: "Not watched in 365 days".to_string(),
    }
}

pub fn cross_match(item_id: LibraryItemId, server_name: &str) -> CrossServerMatch {
    CrossServerMatch {
        item_id,
        server_id: item_id,
        server_name: server_name.to_string(),
        library_id: "movies".to_string(),
        library_name: "Movies".to_string(),
        title: "The Matrix".to_string(),
        size_bytes: Some(2048),
    }
}

/// Every event currently buffered for `receiver`.
pub fn drain(receiver: &mut tokio::sync::broadcast::Receiver<CoreEvent>) -> Vec<CoreEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

pub fn bus() -> EventBus {
    EventBus::new(256)
}
