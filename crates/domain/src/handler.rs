//! Explicit event handler registration for aggregates.
//!
//! Each aggregate type builds one [`HandlerRegistry`] (usually in a
//! `static LazyLock`) mapping event types to the routines that apply them,
//! plus an optional catch-all routine for any other event.

use std::collections::HashMap;
use std::fmt;

use event_store::EventEnvelope;

use crate::aggregate::DomainEvent;
use crate::error::Result;

type ExactHandler<A> = Box<dyn Fn(&mut A, &EventEnvelope) -> Result<()> + Send + Sync>;

/// Catch-all routine receiving the event in its general (envelope) form.
pub type CatchAllHandler<A> = fn(&mut A, &EventEnvelope);

/// The handler chosen for one event.
pub enum ResolvedHandler<'a, A> {
    /// A handler registered for exactly this event type.
    Exact(&'a ExactHandler<A>),
    /// The aggregate's catch-all handler.
    CatchAll(CatchAllHandler<A>),
}

impl<A> ResolvedHandler<'_, A> {
    /// Invokes the handler. A payload that cannot be decoded into the
    /// handler's event type fails before the aggregate is touched.
    pub fn invoke(&self, aggregate: &mut A, event: &EventEnvelope) -> Result<()> {
        match self {
            ResolvedHandler::Exact(handler) => handler(aggregate, event),
            ResolvedHandler::CatchAll(handler) => {
                handler(aggregate, event);
                Ok(())
            }
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, ResolvedHandler::Exact(_))
    }
}

/// Event type to handler table for the aggregate type `A`.
pub struct HandlerRegistry<A> {
    exact: HashMap<&'static str, ExactHandler<A>>,
    catch_all: Option<CatchAllHandler<A>>,
}

impl<A: 'static> HandlerRegistry<A> {
    pub fn new() -> Self {
        Self {
            exact: HashMap::new(),
            catch_all: None,
        }
    }

    /// Registers the handler for events of type `E`.
    ///
    /// Registering a second handler for the same type replaces the first.
    pub fn on<E: DomainEvent>(mut self, handler: fn(&mut A, E)) -> Self {
        self.exact.insert(
            E::EVENT_TYPE,
            Box::new(move |aggregate: &mut A, envelope: &EventEnvelope| {
                let event: E = envelope.decode()?;
                handler(aggregate, event);
                Ok(())
            }),
        );
        self
    }

    /// Registers the catch-all handler used for every event type without an
    /// exact handler.
    pub fn on_any(mut self, handler: CatchAllHandler<A>) -> Self {
        self.catch_all = Some(handler);
        self
    }

    /// Resolves the handler for an event type. An exact handler always wins
    /// over the catch-all.
    pub fn resolve(&self, event_type: &str) -> Option<ResolvedHandler<'_, A>> {
        match self.exact.get(event_type) {
            Some(handler) => Some(ResolvedHandler::Exact(handler)),
            None => self.catch_all.map(ResolvedHandler::CatchAll),
        }
    }

    /// Returns true when events of this type can be applied.
    pub fn handles(&self, event_type: &str) -> bool {
        self.exact.contains_key(event_type) || self.catch_all.is_some()
    }

    pub fn has_catch_all(&self) -> bool {
        self.catch_all.is_some()
    }
}

impl<A: 'static> Default for HandlerRegistry<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for HandlerRegistry<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut event_types: Vec<_> = self.exact.keys().collect();
        event_types.sort();
        f.debug_struct("HandlerRegistry")
            .field("event_types", &event_types)
            .field("catch_all", &self.catch_all.is_some())
            .finish()
    }
}
