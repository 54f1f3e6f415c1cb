//! Starts the library syncs a rule depends on.
//!
//! Each distinct `(server, library)` pair gets exactly one start call, issued
//! concurrently. A 409 from the backend means the job is already running and
//! is joined rather than reported.

use crate::api::{MaintenanceApi, StartSyncOutcome};
use crate::error::{MaintenanceError, Result};
use crate::sync_key::SyncKey;
use crate::types::{LibraryRef, Rule, RuleId};
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// A library whose sync could not be started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartFailure {
    pub key: SyncKey,
    pub library_name: String,
    pub message: String,
}

/// Keys now in flight for a rule, and the ones that failed to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchReport {
    pub rule_id: RuleId,
    /// Newly started jobs.
    pub started: Vec<SyncKey>,
    /// Jobs that were already running and are joined.
    pub joined: Vec<SyncKey>,
    pub failures: Vec<StartFailure>,
}

impl LaunchReport {
    /// Every key the poller should follow, started or joined.
    pub fn tracked_keys(&self) -> Vec<SyncKey> {
        self.started.iter().chain(self.joined.iter()).cloned().collect()
    }
}

pub struct SyncLauncher {
    api: Arc<dyn MaintenanceApi>,
    event_bus: EventBus,
}

impl SyncLauncher {
    pub fn new(api: Arc<dyn MaintenanceApi>, event_bus: EventBus) -> Self {
        Self { api, event_bus }
    }

    /// Libraries of `rule` with duplicate sync keys removed, in rule order.
    pub fn distinct_libraries(rule: &Rule) -> Vec<&LibraryRef> {
        let mut seen = HashSet::new();
        rule.libraries
            .iter()
            .filter(|lib| seen.insert(lib.sync_key()))
            .collect()
    }

    /// Starts one sync per distinct library of `rule`.
    ///
    /// Fails only when the rule has no libraries or when no start call
    /// succeeded. Individual failures are returned in the report and are not
    /// retried.
    #[instrument(skip(self, rule), fields(rule_id = rule.id))]
    pub async fn start(&self, rule: &Rule) -> Result<LaunchReport> {
        let libraries = Self::distinct_libraries(rule);
        if libraries.is_empty() {
            return Err(MaintenanceError::Validation(format!(
                "Rule '{}' has no libraries to sync",
                rule.name
            )));
        }

        debug!(libraries = libraries.len(), "Starting library syncs");

        let calls = libraries.iter().map(|lib| {
            let key = lib.sync_key();
            async move {
                let result = self.api.start_sync(&key).await;
                (key, lib.library_name.clone(), result)
            }
        });

        let mut report = LaunchReport {
            rule_id: rule.id,
            started: Vec::new(),
            joined: Vec::new(),
            failures: Vec::new(),
        };

        for (key, library_name, result) in join_all(calls).await {
            match result {
                Ok(StartSyncOutcome::Started) => report.started.push(key),
                Ok(StartSyncOutcome::AlreadyRunning) => {
                    debug!(key = %key, "Joining running sync");
                    report.joined.push(key);
                }
                Err(e) if e.is_conflict() => {
                    debug!(key = %key, "Joining running sync");
                    report.joined.push(key);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to start library sync");

                    self.event_bus
                        .emit(CoreEvent::Sync(SyncEvent::StartFailed {
                            rule_id: rule.id,
                            library: library_name.clone(),
                            message: e.to_string(),
                        }))
                        .ok();

                    report.failures.push(StartFailure {
                        key,
                        library_name,
                        message: e.to_string(),
                    });
                }
            }
        }

        if report.started.is_empty() && report.joined.is_empty() {
            return Err(MaintenanceError::AllSyncStartsFailed {
                rule_id: rule.id,
                failures: report
                    .failures
                    .iter()
                    .map(|f| format!("{}: {}", f.library_name, f.message))
                    .collect(),
            });
        }

        let tracked = report.tracked_keys();
        info!(
            started = report.started.len(),
            joined = report.joined.len(),
            failed = report.failures.len(),
            "Library syncs in flight"
        );

        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::Started {
                rule_id: rule.id,
                keys: tracked.iter().map(SyncKey::encode).collect(),
            }))
            .ok();

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        Candidate, CandidateId, CandidatePage, CandidateQuery, CrossServerMatch, LibraryItemId,
        SyncStatusSnapshot,
    };
    use async_trait::async_trait;
    use bridge_traits::ByteStream;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Fails start calls for scripted keys with the given HTTP status.
    struct ScriptedStarts {
        failures: HashMap<String, u16>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedStarts {
        fn new(failures: Vec<(&str, u16)>) -> Arc<Self> {
            Arc::new(Self {
                failures: failures
                    .into_iter()
                    .map(|(key, status)| (key.to_string(), status))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl MaintenanceApi for ScriptedStarts {
        async fn start_sync(&self, key: &SyncKey) -> Result<StartSyncOutcome> {
            self.calls.lock().unwrap().push(key.encode());
            match self.failures.get(&key.encode()) {
                Some(&status) => Err(MaintenanceError::Api {
                    status,
                    message: if status == 409 {
                        "sync already in progress".to_string()
                    } else {
                        "server offline".to_string()
                    },
                }),
                None => Ok(StartSyncOutcome::Started),
            }
        }

        async fn sync_status(&self) -> Result<SyncStatusSnapshot> {
            unimplemented!()
        }

        async fn list_candidates(&self, _: RuleId, _: &CandidateQuery) -> Result<CandidatePage> {
            unimplemented!()
        }

        async fn bulk_delete(&self, _: RuleId, _: &[CandidateId]) -> Result<ByteStream> {
            unimplemented!()
        }

        async fn cross_server_matches(&self, _: &Candidate) -> Result<Vec<CrossServerMatch>> {
            unimplemented!()
        }

        async fn delete_library_item(&self, _: LibraryItemId, _: Option<LibraryItemId>) -> Result<()> {
            unimplemented!()
        }
    }

    fn rule(libraries: Vec<LibraryRef>) -> Rule {
        Rule {
            id: 7,
            name: "Old movies".to_string(),
            libraries,
        }
    }

    #[tokio::test]
    async fn test_duplicate_libraries_start_once() {
        let api = ScriptedStarts::new(vec![]);
        let launcher = SyncLauncher::new(api.clone(), EventBus::new(16));

        let report = launcher
            .start(&rule(vec![
                LibraryRef::new(1, "movies", "Movies"),
                LibraryRef::new(2, "movies", "Movies 4K"),
                LibraryRef::new(1, "movies", "Movies"),
            ]))
            .await
            .unwrap();

        let mut calls = api.calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(calls, vec!["1:movies", "2:movies"]);
        assert_eq!(report.tracked_keys().len(), 2);
    }

    #[tokio::test]
    async fn test_conflict_is_joined() {
        let api = ScriptedStarts::new(vec![("2:shows", 409)]);
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();
        let launcher = SyncLauncher::new(api, bus);

        let report = launcher
            .start(&rule(vec![
                LibraryRef::new(1, "movies", "Movies"),
                LibraryRef::new(2, "shows", "Shows"),
            ]))
            .await
            .unwrap();

        assert_eq!(report.started, vec![SyncKey::new(1, "movies")]);
        assert_eq!(report.joined, vec![SyncKey::new(2, "shows")]);
        assert!(report.failures.is_empty());

        match events.recv().await.unwrap() {
            CoreEvent::Sync(SyncEvent::Started { rule_id, keys }) => {
                assert_eq!(rule_id, 7);
                assert_eq!(keys.len(), 2);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_partial_start_failure_keeps_other_keys() {
        let api = ScriptedStarts::new(vec![("2:shows", 502)]);
        let launcher = SyncLauncher::new(api, EventBus::new(16));

        let report = launcher
            .start(&rule(vec![
                LibraryRef::new(1, "movies", "Movies"),
                LibraryRef::new(2, "shows", "Shows"),
            ]))
            .await
            .unwrap();

        assert_eq!(report.tracked_keys(), vec![SyncKey::new(1, "movies")]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].library_name, "Shows");
    }

    #[tokio::test]
    async fn test_all_starts_failed_is_error() {
        let api = ScriptedStarts::new(vec![("1:movies", 502), ("2:shows", 502)]);
        let launcher = SyncLauncher::new(api.clone(), EventBus::new(16));

        let err = launcher
            .start(&rule(vec![
                LibraryRef::new(1, "movies", "Movies"),
                LibraryRef::new(2, "shows", "Shows"),
            ]))
            .await
            .unwrap_err();

        match err {
            MaintenanceError::AllSyncStartsFailed { rule_id, failures } => {
                assert_eq!(rule_id, 7);
                assert_eq!(failures.len(), 2);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // No retries.
        assert_eq!(api.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rule_without_libraries_is_rejected() {
        let api = ScriptedStarts::new(vec![]);
        let launcher = SyncLauncher::new(api.clone(), EventBus::new(16));

        let err = launcher.start(&rule(vec![])).await.unwrap_err();
        assert!(matches!(err, MaintenanceError::Validation(_)));
        assert!(api.calls.lock().unwrap().is_empty());
    }
}
