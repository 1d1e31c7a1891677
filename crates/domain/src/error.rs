//! Domain error types.

use common::AggregateId;
use event_bus::EventBusError;
use event_store::{EventStoreError, Version};
use thiserror::Error;

/// Errors that can occur while loading, mutating or saving aggregates.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A registered converter could not produce a valid successor event.
    #[error("Conversion of {event_type} failed: {reason}")]
    Conversion { event_type: String, reason: String },

    /// Neither an exact nor a catch-all handler exists for the event.
    #[error("No handler for event {event_type} on aggregate {aggregate_type}")]
    UnhandledEvent {
        event_type: String,
        aggregate_type: &'static str,
    },

    /// Another writer advanced the aggregate since it was loaded.
    #[error(
        "Concurrency conflict for aggregate {aggregate_id}: expected version {expected}, found {actual}"
    )]
    Concurrency {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// Aggregate not found.
    #[error("Aggregate not found: {aggregate_type} with id {aggregate_id}")]
    AggregateNotFound {
        aggregate_type: &'static str,
        aggregate_id: AggregateId,
    },

    /// An event was applied to an aggregate it does not belong to.
    #[error("Event {event_type} belongs to aggregate {found}, not {expected}")]
    AggregateIdMismatch {
        event_type: String,
        expected: AggregateId,
        found: AggregateId,
    },

    /// A replayed event does not directly follow the aggregate's version.
    #[error("Out of order event for aggregate {aggregate_id}: expected version {expected}, got {found}")]
    OutOfOrderEvent {
        aggregate_id: AggregateId,
        expected: Version,
        found: Version,
    },

    /// History was replayed onto an aggregate holding unsaved events.
    #[error("Cannot replay onto aggregate {aggregate_id} with {uncommitted} uncommitted events")]
    ReplayWithUncommittedEvents {
        aggregate_id: AggregateId,
        uncommitted: usize,
    },

    /// The events were stored but could not be published.
    #[error(
        "Aggregate {aggregate_id} was stored at version {version} but publishing failed: {source}"
    )]
    PublishFailed {
        aggregate_id: AggregateId,
        version: Version,
        source: EventBusError,
    },

    /// Any other event store failure, passed through unchanged.
    #[error("Event store error: {0}")]
    EventStore(#[source] EventStoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DomainError {
    /// Returns true when reloading the aggregate and retrying the operation
    /// can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DomainError::Concurrency { .. })
    }
}

impl From<EventStoreError> for DomainError {
    fn from(err: EventStoreError) -> Self {
        match err {
            EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            } => DomainError::Concurrency {
                aggregate_id,
                expected,
                actual,
            },
            other => DomainError::EventStore(other),
        }
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
