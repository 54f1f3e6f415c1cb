use crate::types::RuleId;
use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MaintenanceError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid sync key: {0:?}")]
    InvalidSyncKey(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("No library sync could be started for rule {rule_id}: {}", .failures.join("; "))]
    AllSyncStartsFailed { rule_id: RuleId, failures: Vec<String> },

    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl MaintenanceError {
    /// True for the backend's "sync already in progress" signal.
    pub fn is_conflict(&self) -> bool {
        matches!(self, MaintenanceError::Api { status: 409, .. })
    }
}

pub type Result<T> = std::result::Result<T, MaintenanceError>;
