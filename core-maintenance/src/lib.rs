//! # Maintenance Orchestration
//!
//! Client-side coordination of library syncs and candidate deletions for the
//! media library monitor dashboard.
//!
//! ## Overview
//!
//! - [`SyncLauncher`](launcher::SyncLauncher) starts one sync per distinct
//!   library of a rule and joins jobs that are already running.
//! - [`SyncTracker`](poller::SyncTracker) follows every rule's syncs from a
//!   single polling task and retires them once no library is active.
//! - [`BulkDeleteCoordinator`](bulk_delete::BulkDeleteCoordinator) submits a
//!   batch delete and reads its progress stream to a classified outcome.
//! - [`CrossServerDeleteSequencer`](cross_server::CrossServerDeleteSequencer)
//!   deletes copies on other servers before the source item.
//! - [`CandidateBrowser`](candidates::CandidateBrowser) keeps the visible
//!   page, sort and selection consistent.
//!
//! All backend access goes through [`MaintenanceApi`](api::MaintenanceApi);
//! [`HttpMaintenanceApi`](http_api::HttpMaintenanceApi) implements it over the
//! host's `HttpClient`.

pub mod api;
pub mod bulk_delete;
pub mod candidates;
pub mod cross_server;
pub mod error;
pub mod http_api;
pub mod launcher;
pub mod outcome;
pub mod poller;
pub mod selection;
pub mod stream;
pub mod sync_key;
pub mod types;

pub use api::{MaintenanceApi, StartSyncOutcome};
pub use bulk_delete::BulkDeleteCoordinator;
pub use candidates::CandidateBrowser;
pub use cross_server::{CrossServerDeleteReport, CrossServerDeleteSequencer, TargetOutcome};
pub use error::{MaintenanceError, Result};
pub use http_api::HttpMaintenanceApi;
pub use launcher::{LaunchReport, StartFailure, SyncLauncher};
pub use outcome::{DeleteOutcome, DeleteTally, OutcomeKind};
pub use poller::{RuleSyncOperation, SyncTable, SyncTracker, TrackedKey, TrackerView};
pub use selection::{CandidateSelection, SortColumn, SortDirection, SortState};
pub use stream::{ProgressStreamReader, StreamEnd, StreamReport};
pub use sync_key::SyncKey;
pub use types::*;
