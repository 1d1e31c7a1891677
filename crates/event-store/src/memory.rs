use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventStoreError, Result, Version,
    store::{AppendOptions, EventStore, validate_events_for_append},
};

/// In-memory event store.
///
/// Keeps one stream per aggregate and enforces the same optimistic
/// concurrency rules a durable store would. Clones share the same streams,
/// which lets tests hold on to a handle while the repository owns another.
/// Every call is counted so tests can assert on how the store was used.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    streams: Arc<RwLock<HashMap<AggregateId, Vec<EventEnvelope>>>>,
    append_calls: Arc<AtomicUsize>,
    read_calls: Arc<AtomicUsize>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with the given events, bypassing the
    /// concurrency checks. Events are grouped by aggregate and sorted by version.
    pub fn with_events(events: impl IntoIterator<Item = EventEnvelope>) -> Self {
        let mut streams: HashMap<AggregateId, Vec<EventEnvelope>> = HashMap::new();
        for event in events {
            streams.entry(event.aggregate_id).or_default().push(event);
        }
        for stream in streams.values_mut() {
            stream.sort_by_key(|e| e.version);
        }

        Self {
            streams: Arc::new(RwLock::new(streams)),
            ..Self::default()
        }
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.streams.read().await.values().map(Vec::len).sum()
    }

    /// Number of times `append` was called, successful or not.
    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }

    /// Number of times a stream was read through `get_events_for_aggregate`.
    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        validate_events_for_append(&events)?;

        let aggregate_id = events[0].aggregate_id;
        let first_new_version = events[0].version;

        let mut streams = self.streams.write().await;

        let current_version = streams
            .get(&aggregate_id)
            .and_then(|stream| stream.last())
            .map(|e| e.version)
            .unwrap_or(Version::initial());

        if let Some(expected) = options.expected_version
            && current_version != expected
        {
            tracing::debug!(%aggregate_id, %expected, actual = %current_version, "append rejected");
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual: current_version,
            });
        }

        // Unique (aggregate_id, version) constraint.
        if first_new_version <= current_version {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: options.expected_version.unwrap_or(current_version),
                actual: current_version,
            });
        }

        if first_new_version != current_version.next() {
            return Err(EventStoreError::InvalidAppend(format!(
                "stream of {aggregate_id} is at version {current_version}, cannot append version {first_new_version}"
            )));
        }

        let last_version = events
            .last()
            .map(|e| e.version)
            .unwrap_or(current_version);
        streams.entry(aggregate_id).or_default().extend(events);

        Ok(last_version)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        let streams = self.streams.read().await;
        Ok(streams.get(&aggregate_id).cloned().unwrap_or_default())
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let streams = self.streams.read().await;
        Ok(streams.get(&aggregate_id).map(|stream| {
            stream
                .last()
                .map(|e| e.version)
                .unwrap_or(Version::initial())
        }))
    }

    async fn create_stream(&self, aggregate_id: AggregateId) -> Result<()> {
        self.streams
            .write()
            .await
            .entry(aggregate_id)
            .or_default();
        Ok(())
    }
}
