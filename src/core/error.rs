use thiserror::Error;

#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Data integrity violation: {0}")]
    DataIntegrity(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Topology error: {0}")]
    Topology(String),

    #[error("Reader error: {0}")]
    Reader(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),
}

impl RoutingError {
    /// True for duplicate routing rows. Callers warn and keep routing.
    pub fn is_data_integrity(&self) -> bool {
        matches!(self, RoutingError::DataIntegrity(_))
    }
}

pub type Result<T> = std::result::Result<T, RoutingError>;

impl<T> From<std::sync::PoisonError<T>> for RoutingError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}
