//! Rebuilding aggregates from their history.

use common::AggregateId;
use event_store::EventEnvelope;

use crate::aggregate::AggregateRoot;
use crate::error::Result;

/// Rebuilds an aggregate from an ordered sequence of (already converted)
/// events.
pub trait AggregateRootLoader: Send + Sync {
    /// Creates a bare `A` and replays `events` onto it in the order given.
    ///
    /// The caller is responsible for supplying the events in ascending
    /// version order.
    fn load_aggregate_root_from_events<A: AggregateRoot>(
        &self,
        aggregate_id: AggregateId,
        events: Vec<EventEnvelope>,
    ) -> Result<A>;
}

/// Loader that replays every event through the aggregate's handlers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayLoader;

impl AggregateRootLoader for ReplayLoader {
    fn load_aggregate_root_from_events<A: AggregateRoot>(
        &self,
        aggregate_id: AggregateId,
        events: Vec<EventEnvelope>,
    ) -> Result<A> {
        let mut aggregate = A::new(aggregate_id);
        let replayed = events.len();

        for event in events {
            aggregate.replay_event(event)?;
        }

        tracing::debug!(
            aggregate_type = A::aggregate_type(),
            %aggregate_id,
            replayed,
            version = %aggregate.version(),
            "aggregate rebuilt"
        );
        metrics::histogram!("repository_replayed_events").record(replayed as f64);

        Ok(aggregate)
    }
}
