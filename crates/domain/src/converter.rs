//! Event conversion (upcasting).
//!
//! Stored events keep the schema they were written with. Before an event is
//! replayed it is converted to the newest schema the aggregate handles: the
//! converter registered for its type runs, then the converter for the
//! resulting type, and so on until a type without a converter is reached.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use event_store::EventEnvelope;
use thiserror::Error;

use crate::error::{DomainError, Result};

/// Default bound on the number of conversions applied to one event.
pub const DEFAULT_MAX_CONVERSION_DEPTH: usize = 32;

/// Error returned by a single converter.
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct ConversionFailure {
    reason: String,
}

impl ConversionFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for ConversionFailure {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Outcome of a single conversion step.
pub type ConversionResult = std::result::Result<EventEnvelope, ConversionFailure>;

/// Converts one event schema into its successor.
///
/// Implementations change the type and payload only; the event id, owning
/// aggregate and sequence must be carried over (see
/// [`EventEnvelope::upgraded`]).
pub trait ConvertEvent: Send + Sync {
    fn convert(&self, event: EventEnvelope) -> ConversionResult;
}

impl<F> ConvertEvent for F
where
    F: Fn(EventEnvelope) -> ConversionResult + Send + Sync,
{
    fn convert(&self, event: EventEnvelope) -> ConversionResult {
        self(event)
    }
}

/// Registry of converters keyed by the event type they upgrade.
///
/// Converters are registered up front and the registry is only read
/// afterwards, so one instance can be shared by any number of loads.
#[derive(Clone)]
pub struct EventConverter {
    converters: HashMap<String, Arc<dyn ConvertEvent>>,
    max_depth: usize,
}

impl EventConverter {
    pub fn new() -> Self {
        Self {
            converters: HashMap::new(),
            max_depth: DEFAULT_MAX_CONVERSION_DEPTH,
        }
    }

    /// Limits how many conversions may be chained for a single event.
    /// The limit is at least 1.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    /// Registers the converter for `event_type`, replacing any previous one.
    pub fn add_converter(
        mut self,
        event_type: impl Into<String>,
        converter: impl ConvertEvent + 'static,
    ) -> Self {
        self.converters.insert(event_type.into(), Arc::new(converter));
        self
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Converts an event to its current schema.
    ///
    /// Events whose type has no converter are returned unchanged, which also
    /// makes converting an already current event a no-op.
    pub fn convert(&self, event: EventEnvelope) -> Result<EventEnvelope> {
        let mut current = event;
        let mut chain: Vec<String> = Vec::new();

        while let Some(converter) = self.converters.get(current.event_type.as_str()) {
            let from_type = current.event_type.clone();

            if chain.contains(&from_type) {
                return Err(DomainError::Conversion {
                    event_type: from_type,
                    reason: format!("conversion cycle through {}", chain.join(" -> ")),
                });
            }
            if chain.len() >= self.max_depth {
                return Err(DomainError::Conversion {
                    event_type: from_type,
                    reason: format!("more than {} conversions chained", self.max_depth),
                });
            }

            let aggregate_id = current.aggregate_id;
            let version = current.version;
            let next = converter
                .convert(current)
                .map_err(|failure| DomainError::Conversion {
                    event_type: from_type.clone(),
                    reason: failure.to_string(),
                })?;

            if next.aggregate_id != aggregate_id {
                return Err(DomainError::Conversion {
                    event_type: from_type,
                    reason: format!(
                        "converter moved the event from aggregate {aggregate_id} to {}",
                        next.aggregate_id
                    ),
                });
            }
            if next.version != version {
                return Err(DomainError::Conversion {
                    event_type: from_type,
                    reason: format!(
                        "converter changed the sequence from {version} to {}",
                        next.version
                    ),
                });
            }

            tracing::debug!(from = %from_type, to = %next.event_type, %version, "event converted");
            metrics::counter!("events_converted_total").increment(1);

            chain.push(from_type);
            current = next;
        }

        Ok(current)
    }

    /// Converts a batch, preserving its order.
    pub fn convert_all(&self, events: Vec<EventEnvelope>) -> Result<Vec<EventEnvelope>> {
        events.into_iter().map(|event| self.convert(event)).collect()
    }
}

impl Default for EventConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut event_types: Vec<_> = self.converters.keys().collect();
        event_types.sort();
        f.debug_struct("EventConverter")
            .field("event_types", &event_types)
            .field("max_depth", &self.max_depth)
            .finish()
    }
}
