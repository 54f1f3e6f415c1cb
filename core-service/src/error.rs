use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Maintenance error: {0}")]
    Maintenance(#[from] core_maintenance::MaintenanceError),
}

impl CoreError {
    /// True when the operation was cancelled or superseded rather than failed.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            CoreError::Maintenance(core_maintenance::MaintenanceError::Cancelled)
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
