//! Sync status polling shared by every rule with syncs in flight.
//!
//! [`SyncTable`] holds the tracked operations and turns one status snapshot
//! into per-rule status lines and retirements. [`SyncTracker`] owns a single
//! background task that fetches that snapshot on a fixed interval while the
//! table is non-empty and goes idle once it drains.

use crate::api::MaintenanceApi;
use crate::error::{MaintenanceError, Result};
use crate::launcher::LaunchReport;
use crate::sync_key::SyncKey;
use crate::types::{Rule, RuleId, SyncJobState, SyncPhase, SyncStatusSnapshot};
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent, SyncEvent};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ============================================================================
// Tracked operations
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedKey {
    pub key: SyncKey,
    pub library_name: String,
}

/// The sync keys one rule is waiting on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSyncOperation {
    pub rule_id: RuleId,
    pub keys: Vec<TrackedKey>,
}

impl RuleSyncOperation {
    pub fn new(rule_id: RuleId, keys: Vec<TrackedKey>) -> Self {
        let mut op = Self {
            rule_id,
            keys: Vec::new(),
        };
        op.merge(keys);
        op
    }

    /// Operation covering every key the launcher started or joined.
    pub fn from_launch(rule: &Rule, report: &LaunchReport) -> Self {
        let keys = report
            .tracked_keys()
            .into_iter()
            .map(|key| TrackedKey {
                library_name: rule.library_name(&key),
                key,
            })
            .collect();
        Self::new(rule.id, keys)
    }

    fn merge(&mut self, keys: Vec<TrackedKey>) {
        for key in keys {
            if !self.keys.iter().any(|k| k.key == key.key) {
                self.keys.push(key);
            }
        }
    }

    /// Status line for the rule, or `None` once no key is active.
    ///
    /// Keys in the items phase win over keys syncing watch history.
    pub fn status_message(&self, snapshot: &SyncStatusSnapshot) -> Option<String> {
        let find = |phase: SyncPhase| {
            self.keys.iter().find_map(|tracked| {
                snapshot
                    .get(&tracked.key)
                    .filter(|state| state.phase == phase)
                    .map(|state| (tracked, state))
            })
        };

        let (tracked, state) = find(SyncPhase::Items).or_else(|| find(SyncPhase::History))?;
        let line = phase_line(state);

        if self.keys.len() > 1 {
            Some(format!("{}: {}", tracked.library_name, line))
        } else {
            Some(line)
        }
    }

    fn errors(&self, snapshot: &SyncStatusSnapshot) -> Vec<KeyError> {
        self.keys
            .iter()
            .filter_map(|tracked| {
                let state = snapshot.get(&tracked.key)?;
                (state.phase == SyncPhase::Error).then(|| KeyError {
                    library_name: tracked.library_name.clone(),
                    message: state
                        .error
                        .clone()
                        .unwrap_or_else(|| "Sync failed".to_string()),
                })
            })
            .collect()
    }
}

fn phase_line(state: &SyncJobState) -> String {
    let label = match state.phase {
        SyncPhase::History => "Syncing watch history",
        _ => "Syncing items",
    };
    match (state.current, state.total) {
        (Some(current), Some(total)) => format!("{} {}/{}", label, current, total),
        _ => format!("{}...", label),
    }
}

/// One library's sync that ended in error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyError {
    pub library_name: String,
    pub message: String,
}

/// An operation whose keys have all resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetiredOperation {
    pub rule_id: RuleId,
    pub errors: Vec<KeyError>,
    pub key_count: usize,
}

impl RetiredOperation {
    /// Candidates are refetched unless every key failed.
    pub fn should_refetch(&self) -> bool {
        self.errors.len() < self.key_count
    }

    /// One line naming every failed library, if any failed.
    pub fn error_message(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        Some(
            self.errors
                .iter()
                .map(|e| format!("{}: {}", e.library_name, e.message))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// What one snapshot changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Rules whose status line changed.
    pub updates: Vec<(RuleId, String)>,
    pub retired: Vec<RetiredOperation>,
}

/// Tracked operations keyed by rule.
#[derive(Debug, Default)]
pub struct SyncTable {
    operations: BTreeMap<RuleId, RuleSyncOperation>,
    statuses: BTreeMap<RuleId, String>,
}

impl SyncTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an operation, merging keys into one already tracked for the rule.
    pub fn insert(&mut self, op: RuleSyncOperation) {
        match self.operations.get_mut(&op.rule_id) {
            Some(existing) => existing.merge(op.keys),
            None => {
                self.operations.insert(op.rule_id, op);
            }
        }
    }

    /// Applies one snapshot to every tracked operation.
    ///
    /// A key absent from the snapshot is treated as finished.
    pub fn apply_snapshot(&mut self, snapshot: &SyncStatusSnapshot) -> TickReport {
        let mut report = TickReport::default();

        for (rule_id, op) in &self.operations {
            match op.status_message(snapshot) {
                Some(message) => {
                    if self.statuses.get(rule_id) != Some(&message) {
                        self.statuses.insert(*rule_id, message.clone());
                        report.updates.push((*rule_id, message));
                    }
                }
                None => report.retired.push(RetiredOperation {
                    rule_id: *rule_id,
                    errors: op.errors(snapshot),
                    key_count: op.keys.len(),
                }),
            }
        }

        for retired in &report.retired {
            self.operations.remove(&retired.rule_id);
            self.statuses.remove(&retired.rule_id);
        }

        report
    }

    pub fn contains(&self, rule_id: RuleId) -> bool {
        self.operations.contains_key(&rule_id)
    }

    pub fn statuses(&self) -> &BTreeMap<RuleId, String> {
        &self.statuses
    }

    pub fn view(&self) -> TrackerView {
        TrackerView {
            tracked: self.operations.keys().copied().collect(),
            statuses: self.statuses.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Read-only copy of the table published after every change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerView {
    pub tracked: BTreeSet<RuleId>,
    pub statuses: BTreeMap<RuleId, String>,
}

// ============================================================================
// Background tracker
// ============================================================================

/// Handle to the shared polling task.
///
/// Dropping the handle stops the task.
pub struct SyncTracker {
    registrations: mpsc::UnboundedSender<RuleSyncOperation>,
    view: watch::Receiver<TrackerView>,
    cancellation_token: CancellationToken,
}

impl SyncTracker {
    /// Spawns the polling task on the current tokio runtime.
    pub fn spawn(api: Arc<dyn MaintenanceApi>, event_bus: EventBus, interval: Duration) -> Self {
        let (registrations, receiver) = mpsc::unbounded_channel();
        let (view_tx, view) = watch::channel(TrackerView::default());
        let cancellation_token = CancellationToken::new();

        let task = TrackerTask {
            api,
            event_bus,
            interval,
            table: SyncTable::new(),
            registrations: receiver,
            view: view_tx,
            cancellation_token: cancellation_token.clone(),
        };
        tokio::spawn(task.run());

        Self {
            registrations,
            view,
            cancellation_token,
        }
    }

    /// Hands an operation to the polling task.
    pub fn track(&self, op: RuleSyncOperation) -> Result<()> {
        if op.keys.is_empty() {
            return Err(MaintenanceError::Validation(format!(
                "Rule {} has no sync keys to track",
                op.rule_id
            )));
        }
        self.registrations
            .send(op)
            .map_err(|_| MaintenanceError::Cancelled)
    }

    pub fn view(&self) -> TrackerView {
        self.view.borrow().clone()
    }

    /// Watch channel updated after every registration and poll tick.
    pub fn subscribe_view(&self) -> watch::Receiver<TrackerView> {
        self.view.clone()
    }

    pub fn statuses(&self) -> BTreeMap<RuleId, String> {
        self.view.borrow().statuses.clone()
    }

    pub fn status(&self, rule_id: RuleId) -> Option<String> {
        self.view.borrow().statuses.get(&rule_id).cloned()
    }

    pub fn is_tracking(&self, rule_id: RuleId) -> bool {
        self.view.borrow().tracked.contains(&rule_id)
    }

    pub fn shutdown(&self) {
        self.cancellation_token.cancel();
    }
}

impl Drop for SyncTracker {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

struct TrackerTask {
    api: Arc<dyn MaintenanceApi>,
    event_bus: EventBus,
    interval: Duration,
    table: SyncTable,
    registrations: mpsc::UnboundedReceiver<RuleSyncOperation>,
    view: watch::Sender<TrackerView>,
    cancellation_token: CancellationToken,
}

impl TrackerTask {
    async fn run(mut self) {
        let mut next_tick = Instant::now() + self.interval;

        loop {
            if self.table.is_empty() {
                // Idle until something needs tracking.
                tokio::select! {
                    biased;
                    _ = self.cancellation_token.cancelled() => break,
                    op = self.registrations.recv() => match op {
                        Some(op) => {
                            self.register(op);
                            next_tick = Instant::now() + self.interval;
                        }
                        None => break,
                    },
                }
                continue;
            }

            tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => break,
                op = self.registrations.recv() => match op {
                    Some(op) => self.register(op),
                    None => break,
                },
                _ = sleep_until(next_tick) => {
                    self.poll_once().await;
                    next_tick = Instant::now() + self.interval;
                }
            }
        }

        debug!("Sync tracker stopped");
    }

    fn register(&mut self, op: RuleSyncOperation) {
        debug!(rule_id = op.rule_id, keys = op.keys.len(), "Tracking rule sync");
        self.table.insert(op);
        self.view.send_replace(self.table.view());
    }

    async fn poll_once(&mut self) {
        let snapshot = tokio::select! {
            biased;
            _ = self.cancellation_token.cancelled() => return,
            result = self.api.sync_status() => result,
        };

        let snapshot = match snapshot {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // Keep the operations; the next tick retries.
                warn!(error = %e, tracked = self.table.len(), "Sync status poll failed");
                return;
            }
        };

        let report = self.table.apply_snapshot(&snapshot);
        self.view.send_replace(self.table.view());

        for (rule_id, message) in report.updates {
            self.event_bus
                .emit(CoreEvent::Sync(SyncEvent::Progress { rule_id, message }))
                .ok();
        }

        for retired in report.retired {
            let refreshed = retired.should_refetch();

            if let Some(message) = retired.error_message() {
                warn!(rule_id = retired.rule_id, %message, "Library sync failed");
                self.event_bus
                    .emit(CoreEvent::Sync(SyncEvent::Failed {
                        rule_id: retired.rule_id,
                        message,
                        libraries: retired
                            .errors
                            .iter()
                            .map(|e| e.library_name.clone())
                            .collect(),
                    }))
                    .ok();
            }

            if refreshed {
                self.event_bus
                    .emit(CoreEvent::Library(LibraryEvent::CandidatesStale {
                        rule_id: retired.rule_id,
                    }))
                    .ok();
            }

            info!(rule_id = retired.rule_id, refreshed, "Rule sync finished");
            self.event_bus
                .emit(CoreEvent::Sync(SyncEvent::Completed {
                    rule_id: retired.rule_id,
                    refreshed,
                }))
                .ok();
        }
    }
}
