//! Event store port for the aggregate repository.
//!
//! The store owns the ordered history of every aggregate. It is the only
//! place where optimistic concurrency is enforced: an append carries the
//! version the writer last saw and is rejected when another writer got there
//! first.

pub mod error;
pub mod event;
pub mod memory;
pub mod store;

pub use common::{AggregateId, EventId};
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, Version};
pub use memory::InMemoryEventStore;
pub use store::{AppendOptions, EventStore, EventStoreExt, validate_events_for_append};
