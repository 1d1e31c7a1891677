//! Loading and saving aggregates.

use common::AggregateId;
use event_bus::EventBus;
use event_store::{AppendOptions, EventStore, Version};

use crate::aggregate::AggregateRoot;
use crate::config::RepositoryConfig;
use crate::converter::EventConverter;
use crate::error::{DomainError, Result};
use crate::loader::{AggregateRootLoader, ReplayLoader};

/// Repository for event-sourced aggregates.
///
/// The repository is responsible for:
/// 1. Reading an aggregate's history from the event store
/// 2. Converting each historical event to its current schema
/// 3. Rebuilding the aggregate through the loader
/// 4. Persisting uncommitted events, then publishing them on the bus
///
/// It holds no per-aggregate state, so one instance can serve any number of
/// aggregate types and concurrent callers.
pub struct DomainRepository<S, B, L = ReplayLoader>
where
    S: EventStore,
    B: EventBus,
    L: AggregateRootLoader,
{
    store: S,
    bus: B,
    converter: EventConverter,
    loader: L,
    config: RepositoryConfig,
}

impl<S, B> DomainRepository<S, B>
where
    S: EventStore,
    B: EventBus,
{
    /// Creates a repository without converters that replays events through
    /// the aggregates' handlers.
    pub fn new(store: S, bus: B) -> Self {
        Self::with_collaborators(store, bus, EventConverter::new(), ReplayLoader)
    }
}

impl<S, B, L> DomainRepository<S, B, L>
where
    S: EventStore,
    B: EventBus,
    L: AggregateRootLoader,
{
    pub fn with_collaborators(store: S, bus: B, converter: EventConverter, loader: L) -> Self {
        Self {
            store,
            bus,
            converter,
            loader,
            config: RepositoryConfig::default(),
        }
    }

    /// Applies a validated configuration.
    pub fn with_config(mut self, config: RepositoryConfig) -> Result<Self> {
        config.validate()?;
        self.converter = self.converter.with_max_depth(config.max_conversion_depth);
        self.config = config;
        Ok(self)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn converter(&self) -> &EventConverter {
        &self.converter
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Loads an aggregate by replaying its converted history.
    ///
    /// Fails with [`DomainError::AggregateNotFound`] when the store has no
    /// stream for `aggregate_id`. A stream without events yields a bare
    /// aggregate.
    #[tracing::instrument(skip(self), fields(aggregate_type = A::aggregate_type()))]
    pub async fn get_by_id<A: AggregateRoot>(&self, aggregate_id: AggregateId) -> Result<A> {
        let events = self.store.get_events_for_aggregate(aggregate_id).await?;

        if events.is_empty()
            && self
                .store
                .get_aggregate_version(aggregate_id)
                .await?
                .is_none()
        {
            return Err(DomainError::AggregateNotFound {
                aggregate_type: A::aggregate_type(),
                aggregate_id,
            });
        }

        let events = self.converter.convert_all(events)?;
        let aggregate = self
            .loader
            .load_aggregate_root_from_events::<A>(aggregate_id, events)?;

        metrics::counter!("repository_loads_total").increment(1);
        Ok(aggregate)
    }

    /// Loads an aggregate, returning None if it doesn't exist.
    pub async fn find_by_id<A: AggregateRoot>(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Option<A>> {
        match self.get_by_id(aggregate_id).await {
            Ok(aggregate) => Ok(Some(aggregate)),
            Err(DomainError::AggregateNotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Persists the aggregate's uncommitted events and publishes them.
    ///
    /// The append expects the store to still be at the version the
    /// aggregate was loaded at; otherwise [`DomainError::Concurrency`] is
    /// returned and nothing is written. Events are published only after the
    /// append succeeded. A failed publish is reported as
    /// [`DomainError::PublishFailed`]: the events are durable at that point
    /// and the aggregate keeps them as uncommitted.
    ///
    /// Returns the aggregate's version after the save.
    #[tracing::instrument(
        skip(self, aggregate),
        fields(aggregate_type = A::aggregate_type(), aggregate_id = %aggregate.id())
    )]
    pub async fn save<A: AggregateRoot>(&self, aggregate: &mut A) -> Result<Version> {
        let aggregate_id = aggregate.id();

        if !aggregate.has_uncommitted_events() {
            if self.config.publish_empty_batches {
                self.bus
                    .publish(&[])
                    .await
                    .map_err(|source| DomainError::PublishFailed {
                        aggregate_id,
                        version: aggregate.version(),
                        source,
                    })?;
            }
            tracing::debug!("nothing to save");
            return Ok(aggregate.version());
        }

        let events = aggregate.uncommitted_events().to_vec();
        let expected = aggregate.original_version();

        let version = match self
            .store
            .append(events.clone(), AppendOptions::expect_version(expected))
            .await
        {
            Ok(version) => version,
            Err(err) => {
                let err = DomainError::from(err);
                if let DomainError::Concurrency { actual, .. } = &err {
                    tracing::warn!(%expected, %actual, "aggregate modified by another writer");
                    metrics::counter!("repository_concurrency_conflicts_total").increment(1);
                }
                return Err(err);
            }
        };

        if let Err(source) = self.bus.publish(&events).await {
            tracing::warn!(%version, error = %source, "events stored but not published");
            return Err(DomainError::PublishFailed {
                aggregate_id,
                version,
                source,
            });
        }

        metrics::counter!("events_published_total").increment(events.len() as u64);
        metrics::counter!("repository_saves_total").increment(1);
        tracing::debug!(%version, saved = events.len(), "aggregate saved");

        aggregate.mark_changes_as_committed();
        Ok(version)
    }
}
