use thiserror::Error;

/// Errors that can occur when publishing events.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// The bus no longer accepts events.
    #[error("Event bus is closed")]
    Closed,

    /// The transport refused the batch.
    #[error("Publish rejected: {0}")]
    Rejected(String),
}

/// Result type for event bus operations.
pub type Result<T> = std::result::Result<T, EventBusError>;
