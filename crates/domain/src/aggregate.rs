//! Core aggregate and domain event traits.

use common::AggregateId;
use event_store::{EventEnvelope, Version};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{DomainError, Result};
use crate::handler::HandlerRegistry;

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense. Every schema version
/// of an event is its own type with its own `EVENT_TYPE`; an old version is
/// upgraded by the `EventConverter` rather than edited.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    /// The type identity used for storage, conversion and handler dispatch.
    const EVENT_TYPE: &'static str;
}

/// Bookkeeping every aggregate root carries: identity, version and the
/// events applied since the last save.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateCore {
    id: AggregateId,
    version: Version,
    original_version: Version,
    uncommitted: Vec<EventEnvelope>,
}

impl AggregateCore {
    pub fn new(id: AggregateId) -> Self {
        Self {
            id,
            version: Version::initial(),
            original_version: Version::initial(),
            uncommitted: Vec::new(),
        }
    }

    pub fn id(&self) -> AggregateId {
        self.id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn original_version(&self) -> Version {
        self.original_version
    }

    pub fn uncommitted_events(&self) -> &[EventEnvelope] {
        &self.uncommitted
    }

    fn record(&mut self, event: EventEnvelope, is_new: bool) {
        self.version = event.version;
        if is_new {
            self.uncommitted.push(event);
        } else {
            self.original_version = event.version;
        }
    }

    fn commit(&mut self) {
        self.uncommitted.clear();
        self.original_version = self.version;
    }
}

/// Trait for event-sourced aggregate roots.
///
/// An aggregate's state changes only by applying events, and both business
/// operations ([`AggregateRoot::apply_event`]) and replay
/// ([`AggregateRoot::replay_event`]) go through the same dispatch path:
///
/// 1. the event must belong to this aggregate, and history may only be
///    replayed while nothing is uncommitted;
/// 2. its version must directly follow the aggregate's version;
/// 3. the handler is resolved (exact before catch-all) and invoked;
/// 4. new events are queued as uncommitted, replayed ones are not;
/// 5. the aggregate's version becomes the event's version.
///
/// An aggregate is owned by one caller at a time; nothing here is meant to
/// be mutated concurrently.
pub trait AggregateRoot: Send + Sync + Sized + 'static {
    /// Returns the aggregate type name.
    fn aggregate_type() -> &'static str;

    /// Creates a bare instance with no events applied.
    fn new(id: AggregateId) -> Self;

    fn core(&self) -> &AggregateCore;

    fn core_mut(&mut self) -> &mut AggregateCore;

    /// The handler table for this aggregate type, built once.
    fn handlers() -> &'static HandlerRegistry<Self>;

    fn id(&self) -> AggregateId {
        self.core().id()
    }

    /// Sequence of the last applied event.
    fn version(&self) -> Version {
        self.core().version()
    }

    /// Version the aggregate had when it was loaded or last saved.
    fn original_version(&self) -> Version {
        self.core().original_version()
    }

    /// Events applied since the aggregate was loaded or last saved, in
    /// application order.
    fn uncommitted_events(&self) -> &[EventEnvelope] {
        self.core().uncommitted_events()
    }

    fn has_uncommitted_events(&self) -> bool {
        !self.core().uncommitted_events().is_empty()
    }

    /// Forgets the uncommitted events after they have been persisted.
    fn mark_changes_as_committed(&mut self) {
        self.core_mut().commit();
    }

    /// Applies a newly produced event and queues it for saving.
    ///
    /// The event gets the next sequence number of this aggregate.
    fn apply_event<E: DomainEvent>(&mut self, event: E) -> Result<()> {
        let envelope = EventEnvelope::builder()
            .aggregate_id(self.id())
            .aggregate_type(Self::aggregate_type())
            .event_type(E::EVENT_TYPE)
            .version(self.version().next())
            .payload(&event)?
            .build();
        apply_change(self, envelope, true)
    }

    /// Applies a historical event, keeping its recorded sequence number.
    fn replay_event(&mut self, event: EventEnvelope) -> Result<()> {
        apply_change(self, event, false)
    }
}

fn apply_change<A: AggregateRoot>(
    aggregate: &mut A,
    event: EventEnvelope,
    is_new: bool,
) -> Result<()> {
    let expected_id = aggregate.id();
    if event.aggregate_id != expected_id {
        return Err(DomainError::AggregateIdMismatch {
            event_type: event.event_type,
            expected: expected_id,
            found: event.aggregate_id,
        });
    }

    if !is_new && aggregate.has_uncommitted_events() {
        return Err(DomainError::ReplayWithUncommittedEvents {
            aggregate_id: expected_id,
            uncommitted: aggregate.uncommitted_events().len(),
        });
    }

    let expected_version = aggregate.version().next();
    if event.version != expected_version {
        return Err(DomainError::OutOfOrderEvent {
            aggregate_id: expected_id,
            expected: expected_version,
            found: event.version,
        });
    }

    let handler = A::handlers()
        .resolve(&event.event_type)
        .ok_or_else(|| DomainError::UnhandledEvent {
            event_type: event.event_type.clone(),
            aggregate_type: A::aggregate_type(),
        })?;
    handler.invoke(aggregate, &event)?;

    aggregate.core_mut().record(event, is_new);
    Ok(())
}
