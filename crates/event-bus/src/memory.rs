use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use event_store::EventEnvelope;
use tokio::sync::{RwLock, broadcast};

use crate::{EventBus, EventBusError, Result};

const DEFAULT_CAPACITY: usize = 1024;

/// In-memory event bus.
///
/// Keeps every published event in publish order and fans each one out to
/// broadcast subscribers. Clones share state. A closed bus rejects every
/// publish with [`EventBusError::Closed`], which tests use to simulate a
/// transport outage.
#[derive(Clone)]
pub struct InMemoryEventBus {
    published: Arc<RwLock<Vec<EventEnvelope>>>,
    publish_calls: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    sender: broadcast::Sender<EventEnvelope>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a bus whose subscribers lag after `capacity` undelivered events.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            published: Arc::default(),
            publish_calls: Arc::default(),
            closed: Arc::default(),
            sender,
        }
    }

    /// Subscribes to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Returns every event published so far, oldest first.
    pub async fn published_events(&self) -> Vec<EventEnvelope> {
        self.published.read().await.clone()
    }

    /// Number of times `publish` was called, including rejected calls.
    pub fn publish_calls(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }

    /// Makes every following publish fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, events: &[EventEnvelope]) -> Result<()> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            return Err(EventBusError::Closed);
        }

        self.published.write().await.extend_from_slice(events);
        for event in events {
            // No subscribers is not an error for a fan-out bus.
            if self.sender.send(event.clone()).is_err() {
                tracing::trace!(event_type = %event.event_type, "no subscribers");
            }
        }

        Ok(())
    }
}
