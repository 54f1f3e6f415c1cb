//! Core service façade and bootstrap helpers.
//!
//! This crate wires the monitor configuration, the HTTP backend and the event
//! bus into the maintenance components and exposes them to the dashboard as
//! one handle. Desktop builds enable the `desktop-shims` feature so that
//! [`MonitorConfig`] can fall back to the `reqwest` client from
//! `bridge-desktop`.

pub mod error;

pub use error::{CoreError, Result};

pub use core_runtime::config::{MonitorConfig, MonitorConfigBuilder};
pub use core_runtime::events::{CoreEvent, EventBus, EventStream};

use core_maintenance::{
    BulkDeleteCoordinator, Candidate, CandidateBrowser, CrossServerDeleteReport,
    CrossServerDeleteSequencer, CrossServerMatch, DeleteOutcome, DeleteProgress,
    HttpMaintenanceApi, LaunchReport, MaintenanceApi, MaintenanceError, Rule, RuleId,
    RuleSyncOperation, SyncLauncher, SyncTracker,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Primary façade exposed to the dashboard.
///
/// Must be created inside a tokio runtime; the sync tracker's polling task
/// is spawned on it.
pub struct MaintenanceService {
    config: MonitorConfig,
    api: Arc<dyn MaintenanceApi>,
    event_bus: EventBus,
    launcher: SyncLauncher,
    tracker: SyncTracker,
    bulk_delete: BulkDeleteCoordinator,
    cross_server: CrossServerDeleteSequencer,
}

impl MaintenanceService {
    /// Creates the service against the HTTP backend named by `config`.
    pub fn new(config: MonitorConfig) -> Result<Self> {
        config.validate()?;
        let api = Arc::new(HttpMaintenanceApi::from_config(&config));
        Self::with_api(api, config)
    }

    /// Creates the service over an injected backend.
    pub fn with_api(api: Arc<dyn MaintenanceApi>, config: MonitorConfig) -> Result<Self> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(CoreError::InitializationFailed(
                "MaintenanceService must be created inside a tokio runtime".to_string(),
            ));
        }

        let event_bus = EventBus::new(config.event_buffer_size);
        let tracker = SyncTracker::spawn(api.clone(), event_bus.clone(), config.sync_poll_interval);

        info!(base_url = %config.base_url, "Maintenance service started");

        Ok(Self {
            launcher: SyncLauncher::new(api.clone(), event_bus.clone()),
            bulk_delete: BulkDeleteCoordinator::new(api.clone(), event_bus.clone()),
            cross_server: CrossServerDeleteSequencer::new(api.clone(), event_bus.clone()),
            tracker,
            event_bus,
            api,
            config,
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn api(&self) -> Arc<dyn MaintenanceApi> {
        Arc::clone(&self.api)
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.event_bus.subscribe())
    }

    /// Starts the rule's library syncs and tracks them until they finish.
    ///
    /// Candidates become stale once the syncs complete; listen for
    /// `LibraryEvent::CandidatesStale` to refetch.
    #[instrument(skip(self, rule), fields(rule_id = rule.id))]
    pub async fn sync_and_evaluate(&self, rule: &Rule) -> Result<LaunchReport> {
        let report = self.launcher.start(rule).await?;
        self.tracker
            .track(RuleSyncOperation::from_launch(rule, &report))?;
        Ok(report)
    }

    /// Current status line for a rule with syncs in flight.
    pub fn sync_status(&self, rule_id: RuleId) -> Option<String> {
        self.tracker.status(rule_id)
    }

    pub fn is_syncing(&self, rule_id: RuleId) -> bool {
        self.tracker.is_tracking(rule_id)
    }

    pub fn browser(&self, rule_id: RuleId, per_page: u32) -> CandidateBrowser {
        CandidateBrowser::new(self.api(), rule_id, per_page)
    }

    /// Deletes the browser's selection.
    ///
    /// When anything may have changed the selection is cleared and the page
    /// refetched before returning. A failed refetch does not hide the
    /// outcome; the browser keeps its previous page and
    /// `LibraryEvent::CandidatesStale` has already been emitted.
    #[instrument(skip(self, browser), fields(rule_id = browser.rule_id()))]
    pub async fn delete_selected(&self, browser: &mut CandidateBrowser) -> Result<DeleteOutcome> {
        let ids = browser.selected_ids();
        if ids.is_empty() {
            return Err(MaintenanceError::Validation("No candidates selected".to_string()).into());
        }

        let outcome = self.bulk_delete.run(browser.rule_id(), &ids).await?;

        if outcome.needs_refresh() {
            browser.clear_selection();
            if let Err(e) = browser.refresh().await {
                warn!(error = %e, "Failed to refresh candidates after delete");
            }
        }

        Ok(outcome)
    }

    pub fn delete_progress(&self) -> Option<DeleteProgress> {
        self.bulk_delete.progress()
    }

    pub fn cancel_delete(&self) {
        self.bulk_delete.cancel();
    }

    pub async fn cross_server_matches(&self, candidate: &Candidate) -> Result<Vec<CrossServerMatch>> {
        Ok(self.cross_server.find_matches(candidate).await?)
    }

    pub async fn delete_with_matches(
        &self,
        candidate: &Candidate,
        selected: &[CrossServerMatch],
    ) -> Result<CrossServerDeleteReport> {
        Ok(self.cross_server.delete(candidate, selected).await?)
    }

    /// Stops polling and aborts any in-flight bulk delete.
    pub fn shutdown(&self) {
        self.tracker.shutdown();
        self.bulk_delete.cancel();
        info!("Maintenance service stopped");
    }
}
