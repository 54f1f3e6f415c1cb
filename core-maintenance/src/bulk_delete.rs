//! Runs batch deletes for a candidate table and classifies the outcome.
//!
//! One coordinator backs one view. Starting a run cancels the previous one,
//! and a cancelled run never writes progress or an outcome.

use crate::api::MaintenanceApi;
use crate::error::{MaintenanceError, Result};
use crate::outcome::{DeleteOutcome, DeleteTally};
use crate::stream::{ProgressStreamReader, StreamEnd};
use crate::types::{CandidateId, DeleteProgress, DeleteRunId, RuleId};
use core_runtime::events::{CoreEvent, DeletionEvent, EventBus, LibraryEvent};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

const NO_RESULT: &str = "stream ended before the final result";

#[derive(Default)]
struct RunState {
    generation: u64,
    active: Option<CancellationToken>,
    progress: Option<DeleteProgress>,
    last_outcome: Option<DeleteOutcome>,
}

/// Marks a run as in flight. Unless the run finishes, dropping the guard
/// releases the run's slot and reports the run as aborted. This also covers
/// the caller dropping the `run` future mid-stream.
struct ActiveRun<'a> {
    coordinator: &'a BulkDeleteCoordinator,
    generation: u64,
    run_id: DeleteRunId,
    finished: bool,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        {
            let mut state = self.coordinator.lock();
            if state.generation == self.generation {
                if let Some(token) = state.active.take() {
                    token.cancel();
                }
            }
        }

        self.coordinator.abort(self.run_id);
    }
}

pub struct BulkDeleteCoordinator {
    api: Arc<dyn MaintenanceApi>,
    event_bus: EventBus,
    state: Mutex<RunState>,
}

impl BulkDeleteCoordinator {
    pub fn new(api: Arc<dyn MaintenanceApi>, event_bus: EventBus) -> Self {
        Self {
            api,
            event_bus,
            state: Mutex::new(RunState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Progress of the current run, zeroed when the run starts.
    pub fn progress(&self) -> Option<DeleteProgress> {
        self.lock().progress.clone()
    }

    /// Outcome of the most recent run that was not cancelled.
    pub fn last_outcome(&self) -> Option<DeleteOutcome> {
        self.lock().last_outcome.clone()
    }

    pub fn is_running(&self) -> bool {
        self.lock().active.is_some()
    }

    /// Aborts the in-flight run, if any.
    pub fn cancel(&self) {
        if let Some(token) = self.lock().active.take() {
            token.cancel();
        }
    }

    /// Deletes `candidate_ids` for `rule_id` and waits for the outcome.
    ///
    /// Returns `MaintenanceError::Cancelled` if the run was cancelled or
    /// superseded by a newer run. Transport and stream failures are returned
    /// as an error outcome, not as `Err`.
    #[instrument(skip(self, candidate_ids), fields(requested = candidate_ids.len()))]
    pub async fn run(&self, rule_id: RuleId, candidate_ids: &[CandidateId]) -> Result<DeleteOutcome> {
        let mut seen = HashSet::new();
        let ids: Vec<CandidateId> = candidate_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();

        if ids.is_empty() {
            return Err(MaintenanceError::Validation(
                "Select at least one candidate to delete".to_string(),
            ));
        }

        let requested = ids.len() as u64;
        let run_id = DeleteRunId::new();
        let token = CancellationToken::new();

        let generation = {
            let mut state = self.lock();
            if let Some(previous) = state.active.replace(token.clone()) {
                previous.cancel();
            }
            state.generation += 1;
            state.progress = Some(DeleteProgress::new(requested));
            state.generation
        };
        let mut guard = ActiveRun {
            coordinator: self,
            generation,
            run_id,
            finished: false,
        };

        info!(%run_id, rule_id, requested, "Starting bulk delete");
        self.event_bus
            .emit(CoreEvent::Deletion(DeletionEvent::Started {
                run_id: run_id.to_string(),
                rule_id,
                total: requested,
            }))
            .ok();

        let body = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(MaintenanceError::Cancelled),
            body = self.api.bulk_delete(rule_id, &ids) => body,
        };

        let outcome = match body {
            Err(e) => {
                warn!(%run_id, error = %e, "Bulk delete request failed");
                DeleteOutcome::transport_failure(requested, &e.to_string())
            }
            Ok(body) => {
                let report = ProgressStreamReader::new(body, token.clone())
                    .run(|progress| self.apply_progress(generation, &token, run_id, progress))
                    .await;

                match (report.end, report.result) {
                    (StreamEnd::Cancelled, _) => return Err(MaintenanceError::Cancelled),
                    (StreamEnd::Finished, Some(result)) => {
                        DeleteOutcome::classify(DeleteTally::from_result(requested, &result))
                    }
                    (StreamEnd::Failed(message), _) => {
                        DeleteOutcome::transport_failure(requested, &message)
                    }
                    (StreamEnd::Finished, None) | (StreamEnd::Closed, _) => {
                        warn!(%run_id, "Bulk delete stream closed without a result");
                        DeleteOutcome::transport_failure(requested, NO_RESULT)
                    }
                }
            }
        };

        {
            let mut state = self.lock();
            if state.generation != generation || token.is_cancelled() {
                return Err(MaintenanceError::Cancelled);
            }
            state.active = None;
            state.last_outcome = Some(outcome.clone());
            guard.finished = true;
        }

        info!(%run_id, kind = ?outcome.kind, message = %outcome.message, "Bulk delete finished");
        self.event_bus
            .emit(CoreEvent::Deletion(DeletionEvent::Finished {
                run_id: run_id.to_string(),
                kind: outcome.kind.into(),
                message: outcome.message.clone(),
            }))
            .ok();

        if outcome.needs_refresh() {
            self.event_bus
                .emit(CoreEvent::Library(LibraryEvent::SelectionCleared { rule_id }))
                .ok();
            self.event_bus
                .emit(CoreEvent::Library(LibraryEvent::CandidatesStale { rule_id }))
                .ok();
        }

        Ok(outcome)
    }

    fn apply_progress(
        &self,
        generation: u64,
        token: &CancellationToken,
        run_id: DeleteRunId,
        progress: &DeleteProgress,
    ) {
        {
            let mut state = self.lock();
            if state.generation != generation || token.is_cancelled() {
                return;
            }
            state.progress = Some(progress.clone());
        }

        self.event_bus
            .emit(CoreEvent::Deletion(DeletionEvent::Progress {
                run_id: run_id.to_string(),
                current: progress.current,
                total: progress.total,
                deleted: progress.deleted,
                failed: progress.failed,
                skipped: progress.skipped,
                reclaimed_bytes: progress.reclaimed_bytes,
            }))
            .ok();
    }

    fn abort(&self, run_id: DeleteRunId) {
        info!(%run_id, "Bulk delete cancelled");
        self.event_bus
            .emit(CoreEvent::Deletion(DeletionEvent::Aborted {
                run_id: run_id.to_string(),
            }))
            .ok();
    }
}

impl Drop for BulkDeleteCoordinator {
    fn drop(&mut self) {
        self.cancel();
    }
}
