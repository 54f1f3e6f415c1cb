//! Classification of deletion results shared by the bulk and cross-server
//! delete paths.

use crate::types::{BulkDeleteResult, ItemError};
use core_runtime::events::DeletionKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Success,
    Partial,
    Error,
}

impl From<OutcomeKind> for DeletionKind {
    fn from(kind: OutcomeKind) -> Self {
        match kind {
            OutcomeKind::Success => DeletionKind::Success,
            OutcomeKind::Partial => DeletionKind::Partial,
            OutcomeKind::Error => DeletionKind::Error,
        }
    }
}

/// Aggregate counts for one deletion request.
///
/// `deleted + failed + skipped == requested` holds for every tally built
/// through [`DeleteTally::reconciled`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteTally {
    pub requested: u64,
    pub deleted: u64,
    pub failed: u64,
    pub skipped: u64,
    pub reclaimed_bytes: u64,
    pub errors: Vec<ItemError>,
}

impl DeleteTally {
    /// Tally from a terminal bulk delete frame for `requested` ids.
    pub fn from_result(requested: u64, result: &BulkDeleteResult) -> Self {
        Self {
            requested,
            deleted: result.deleted,
            failed: result.failed,
            skipped: result.skipped,
            reclaimed_bytes: result.total_size,
            errors: result.errors.clone(),
        }
        .reconciled()
    }

    /// Forces the counters to account for exactly `requested` items.
    ///
    /// Missing items count as failed. Surplus is removed from skipped first,
    /// then failed, then deleted.
    pub fn reconciled(mut self) -> Self {
        let accounted = self.accounted();

        if accounted < self.requested {
            let missing = self.requested - accounted;
            self.failed += missing;
            self.errors.push(ItemError {
                title: format!("{} {}", missing, plural(missing)),
                error: "No result was reported by the server".to_string(),
            });
        } else if accounted > self.requested {
            self.deleted = self.deleted.min(self.requested);
            self.failed = self.failed.min(self.requested - self.deleted);
            self.skipped = self.skipped.min(self.requested - self.deleted - self.failed);
        }

        self
    }

    pub fn is_balanced(&self) -> bool {
        self.accounted() == self.requested
    }

    /// Server-supplied counters may be arbitrarily large.
    fn accounted(&self) -> u64 {
        self.deleted
            .saturating_add(self.failed)
            .saturating_add(self.skipped)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub kind: OutcomeKind,
    pub tally: DeleteTally,
    pub message: String,
}

impl DeleteOutcome {
    pub fn classify(tally: DeleteTally) -> Self {
        let DeleteTally {
            requested,
            deleted,
            failed,
            skipped,
            reclaimed_bytes,
            ..
        } = tally;

        let (kind, message) = if deleted > 0 && failed == 0 && skipped == 0 {
            let mut message = format!("Deleted {} {}", deleted, plural(deleted));
            if reclaimed_bytes > 0 {
                message.push_str(&format!(" ({} reclaimed)", format_bytes(reclaimed_bytes)));
            }
            (OutcomeKind::Success, message)
        } else if deleted > 0 {
            (
                OutcomeKind::Partial,
                format!(
                    "Deleted {} of {} {} ({} failed, {} skipped)",
                    deleted,
                    requested,
                    plural(requested),
                    failed,
                    skipped
                ),
            )
        } else if failed == 0 && skipped > 0 {
            (
                OutcomeKind::Partial,
                format!(
                    "All {} {} were skipped; they may have been excluded after the page was loaded",
                    skipped,
                    plural(skipped)
                ),
            )
        } else {
            (
                OutcomeKind::Error,
                format!("Failed to delete {} {}", requested, plural(requested)),
            )
        };

        Self {
            kind,
            tally,
            message,
        }
    }

    /// Outcome for a stream that ended without a terminal frame.
    ///
    /// Nothing is credited as deleted: counts only ever come from the server.
    pub fn transport_failure(requested: u64, reason: &str) -> Self {
        Self {
            kind: OutcomeKind::Error,
            tally: DeleteTally {
                requested,
                failed: requested,
                ..DeleteTally::default()
            },
            message: format!("Delete failed: {}", reason),
        }
    }

    /// False only for an error that deleted nothing.
    pub fn needs_refresh(&self) -> bool {
        !(self.kind == OutcomeKind::Error && self.tally.deleted == 0)
    }
}

fn plural(count: u64) -> &'static str {
    if count == 1 {
        "item"
    } else {
        "items"
    }
}

/// Renders a byte count in binary units, e.g. `1.5 GB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rendered = format!("{:.1}", value);
    let rendered = rendered.strip_suffix(".0").unwrap_or(&rendered);
    format!("{} {}", rendered, UNITS[unit])
}
