use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("Storage error: {0}")]
    StorageError(#[from] rocksdb::Error),
    #[error("Notification transport error: {0}")]
    TransportError(#[from] reqwest::Error),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Loan not found: {0}")]
    LoanNotFound(String),
    #[error("Event not found: {0}")]
    EventNotFound(u64),
    #[error("Notification error: {0}")]
    NotificationError(String),
    #[error("Loan {loan_id} no longer qualifies for {change:?}")]
    TransitionConflict {
        loan_id: String,
        change: crate::domain::event::LifecycleChange,
    },
    #[error("Job panicked: {0}")]
    Panicked(String),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, ProcessorError>;
