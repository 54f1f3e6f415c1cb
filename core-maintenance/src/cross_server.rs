//! Deletes a candidate together with copies of it on other servers.
//!
//! Matches are verified by the backend against the source item, so every
//! selected match is attempted before the source itself is deleted.

use crate::api::MaintenanceApi;
use crate::error::{MaintenanceError, Result};
use crate::outcome::{DeleteOutcome, DeleteTally};
use crate::types::{Candidate, CrossServerMatch, DeleteRunId, ItemError, LibraryItemId};
use core_runtime::events::{CoreEvent, DeletionEvent, EventBus, LibraryEvent};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Result of one delete call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetOutcome {
    pub item_id: LibraryItemId,
    /// `None` for the source item.
    pub server_name: Option<String>,
    pub library_name: Option<String>,
    pub title: String,
    pub size_bytes: Option<u64>,
    pub error: Option<String>,
}

impl TargetOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    fn label(&self) -> String {
        match &self.server_name {
            Some(server) => format!("{} on {}", self.title, server),
            None => self.title.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossServerDeleteReport {
    pub source: TargetOutcome,
    /// In the order they were attempted.
    pub matches: Vec<TargetOutcome>,
    pub outcome: DeleteOutcome,
}

impl CrossServerDeleteReport {
    fn tally(source: &TargetOutcome, matches: &[TargetOutcome]) -> DeleteTally {
        let targets = || std::iter::once(source).chain(matches.iter());

        let requested = targets().count() as u64;
        let deleted = targets().filter(|t| t.succeeded()).count() as u64;
        let reclaimed_bytes = targets()
            .filter(|t| t.succeeded())
            .filter_map(|t| t.size_bytes)
            .sum();
        let errors = targets()
            .filter_map(|t| {
                t.error.as_ref().map(|error| ItemError {
                    title: t.label(),
                    error: error.clone(),
                })
            })
            .collect();

        DeleteTally {
            requested,
            deleted,
            failed: requested - deleted,
            skipped: 0,
            reclaimed_bytes,
            errors,
        }
    }
}

pub struct CrossServerDeleteSequencer {
    api: Arc<dyn MaintenanceApi>,
    event_bus: EventBus,
}

impl CrossServerDeleteSequencer {
    pub fn new(api: Arc<dyn MaintenanceApi>, event_bus: EventBus) -> Self {
        Self { api, event_bus }
    }

    /// Copies of `candidate` on other servers. The candidate's own item is
    /// removed from the backend listing.
    pub async fn find_matches(&self, candidate: &Candidate) -> Result<Vec<CrossServerMatch>> {
        let matches = self.api.cross_server_matches(candidate).await?;
        Ok(matches
            .into_iter()
            .filter(|m| m.item_id != candidate.item.id)
            .collect())
    }

    /// Deletes every selected match, then the source.
    ///
    /// A failed delete never stops the remaining ones. The returned outcome
    /// counts the source and each match as one requested item.
    #[instrument(skip(self, source, selected), fields(candidate_id = source.id, matches = selected.len()))]
    pub async fn delete(
        &self,
        source: &Candidate,
        selected: &[CrossServerMatch],
    ) -> Result<CrossServerDeleteReport> {
        if selected.iter().any(|m| m.item_id == source.item.id) {
            return Err(MaintenanceError::Validation(
                "The source item cannot be selected as its own match".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let selected: Vec<&CrossServerMatch> = selected
            .iter()
            .filter(|m| seen.insert(m.item_id))
            .collect();

        let run_id = DeleteRunId::new();
        self.event_bus
            .emit(CoreEvent::Deletion(DeletionEvent::Started {
                run_id: run_id.to_string(),
                rule_id: source.rule_id,
                total: selected.len() as u64 + 1,
            }))
            .ok();

        let mut matches = Vec::with_capacity(selected.len());
        for target in selected {
            let error = match self
                .api
                .delete_library_item(target.item_id, Some(source.item.id))
                .await
            {
                Ok(()) => {
                    debug!(item_id = target.item_id, server = %target.server_name, "Deleted match");
                    None
                }
                Err(e) => {
                    warn!(
                        item_id = target.item_id,
                        server = %target.server_name,
                        error = %e,
                        "Failed to delete match"
                    );
                    Some(e.to_string())
                }
            };

            matches.push(TargetOutcome {
                item_id: target.item_id,
                server_name: Some(target.server_name.clone()),
                library_name: Some(target.library_name.clone()),
                title: target.title.clone(),
                size_bytes: target.size_bytes,
                error,
            });
        }

        let source_error = match self.api.delete_library_item(source.item.id, None).await {
            Ok(()) => None,
            Err(e) => {
                warn!(item_id = source.item.id, error = %e, "Failed to delete source item");
                Some(e.to_string())
            }
        };
        let source_outcome = TargetOutcome {
            item_id: source.item.id,
            server_name: None,
            library_name: None,
            title: source.item.title.clone(),
            size_bytes: source.item.size_bytes,
            error: source_error,
        };

        let outcome =
            DeleteOutcome::classify(CrossServerDeleteReport::tally(&source_outcome, &matches));

        info!(%run_id, kind = ?outcome.kind, message = %outcome.message, "Cross-server delete finished");
        self.event_bus
            .emit(CoreEvent::Deletion(DeletionEvent::Finished {
                run_id: run_id.to_string(),
                kind: outcome.kind.into(),
                message: outcome.message.clone(),
            }))
            .ok();

        if outcome.needs_refresh() {
            self.event_bus
                .emit(CoreEvent::Library(LibraryEvent::CandidatesStale {
                    rule_id: source.rule_id,
                }))
                .ok();
        }

        Ok(CrossServerDeleteReport {
            source: source_outcome,
            matches,
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(item_id: LibraryItemId, size: Option<u64>, error: Option<&str>) -> TargetOutcome {
        TargetOutcome {
            item_id,
            server_name: Some("Backup".to_string()),
            library_name: Some("Movies".to_string()),
            title: "Heat".to_string(),
            size_bytes: size,
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_tally_counts_source_and_matches() {
        let source = TargetOutcome {
            server_name: None,
            library_name: None,
            ..target(1, Some(100), None)
        };
        let matches = vec![target(2, Some(50), Some("server offline")), target(3, Some(25), None)];

        let tally = CrossServerDeleteReport::tally(&source, &matches);

        assert_eq!(tally.requested, 3);
        assert_eq!(tally.deleted, 2);
        assert_eq!(tally.failed, 1);
        assert_eq!(tally.reclaimed_bytes, 125);
        assert_eq!(tally.errors[0].title, "Heat on Backup");
        assert!(tally.is_balanced());
    }

    #[test]
    fn test_source_only_failure_is_error() {
        let source = TargetOutcome {
            server_name: None,
            ..target(1, None, Some("not found"))
        };

        let outcome = DeleteOutcome::classify(CrossServerDeleteReport::tally(&source, &[]));
        assert_eq!(outcome.message, "Failed to delete 1 item");
        assert_eq!(outcome.tally.errors[0].title, "Heat");
    }
}
