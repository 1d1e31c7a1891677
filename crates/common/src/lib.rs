//! Identifier types shared by the event store, the event bus and the domain layer.

mod types;

pub use types::{AggregateId, EventId};
