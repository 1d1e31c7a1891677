use std::sync::Arc;

use async_trait::async_trait;
use event_store::EventEnvelope;

use crate::Result;

/// Delivers persisted events to subscribers.
///
/// Callers only hand events to the bus once the store has accepted them, so
/// subscribers may assume every event they receive is durable. Delivery is
/// best effort; a failed publish is reported to the caller and never retried
/// by the bus itself.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes a batch of events in the given order.
    async fn publish(&self, events: &[EventEnvelope]) -> Result<()>;
}

#[async_trait]
impl<B> EventBus for Arc<B>
where
    B: EventBus + ?Sized,
{
    async fn publish(&self, events: &[EventEnvelope]) -> Result<()> {
        (**self).publish(events).await
    }
}
