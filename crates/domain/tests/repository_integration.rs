//! Integration tests for the domain repository.
//!
//! These tests drive a small aggregate through the in-memory store and bus,
//! covering event conversion, loading through a custom loader, save ordering,
//! concurrency handling and publish failures.

use std::sync::{Arc, LazyLock, Mutex};

use async_trait::async_trait;
use common::AggregateId;
use domain::{
    AggregateCore, AggregateRoot, AggregateRootLoader, ConversionResult, DomainError, DomainEvent,
    DomainRepository, EventConverter, HandlerRegistry, ReplayLoader,
};
use event_bus::{EventBus, EventBusError, InMemoryEventBus};
use event_store::{EventEnvelope, EventStore, InMemoryEventStore, Version};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FooEvent {
    label: String,
}

impl DomainEvent for FooEvent {
    const EVENT_TYPE: &'static str = "FooEvent";
}

/// First schema of the bar event, only ever read from storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BarEvent {
    amount: i64,
}

impl DomainEvent for BarEvent {
    const EVENT_TYPE: &'static str = "BarEvent";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BarEventV2 {
    amount: i64,
    note: String,
}

impl DomainEvent for BarEventV2 {
    const EVENT_TYPE: &'static str = "BarEvent_v2";
}

#[derive(Debug)]
struct MyAggregateRoot {
    core: AggregateCore,
    foo_labels: Vec<String>,
    bar_total: i64,
    bar_notes: Vec<String>,
    other_events: Vec<String>,
}

impl MyAggregateRoot {
    fn foo(&mut self, label: &str) -> domain::Result<()> {
        self.apply_event(FooEvent {
            label: label.to_string(),
        })
    }

    fn bar(&mut self, amount: i64) -> domain::Result<()> {
        self.apply_event(BarEventV2 {
            amount,
            note: "live".to_string(),
        })
    }

    fn on_foo(&mut self, event: FooEvent) {
        self.foo_labels.push(event.label);
    }

    fn on_bar(&mut self, event: BarEventV2) {
        self.bar_total += event.amount;
        self.bar_notes.push(event.note);
    }

    fn on_other(&mut self, event: &EventEnvelope) {
        self.other_events.push(event.event_type.clone());
    }
}

impl AggregateRoot for MyAggregateRoot {
    fn aggregate_type() -> &'static str {
        "MyAggregateRoot"
    }

    fn new(id: AggregateId) -> Self {
        Self {
            core: AggregateCore::new(id),
            foo_labels: Vec::new(),
            bar_total: 0,
            bar_notes: Vec::new(),
            other_events: Vec::new(),
        }
    }

    fn core(&self) -> &AggregateCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AggregateCore {
        &mut self.core
    }

    fn handlers() -> &'static HandlerRegistry<Self> {
        static HANDLERS: LazyLock<HandlerRegistry<MyAggregateRoot>> = LazyLock::new(|| {
            HandlerRegistry::new()
                .on(MyAggregateRoot::on_foo)
                .on(MyAggregateRoot::on_bar)
                .on_any(MyAggregateRoot::on_other)
        });
        &HANDLERS
    }
}

fn bar_v1_to_v2(event: EventEnvelope) -> ConversionResult {
    let old: BarEvent = event.decode()?;
    Ok(event.upgraded(
        BarEventV2::EVENT_TYPE,
        &BarEventV2 {
            amount: old.amount,
            note: "converted".to_string(),
        },
    )?)
}

fn stored<E: DomainEvent>(id: AggregateId, version: i64, event: &E) -> EventEnvelope {
    EventEnvelope::builder()
        .aggregate_id(id)
        .aggregate_type(MyAggregateRoot::aggregate_type())
        .event_type(E::EVENT_TYPE)
        .version(Version::new(version))
        .payload(event)
        .unwrap()
        .build()
}

fn stored_raw(id: AggregateId, version: i64, event_type: &str) -> EventEnvelope {
    EventEnvelope::builder()
        .aggregate_id(id)
        .aggregate_type(MyAggregateRoot::aggregate_type())
        .event_type(event_type)
        .version(Version::new(version))
        .payload_raw(serde_json::json!({}))
        .build()
}

/// Loader that records what it was asked to load, then replays.
#[derive(Default)]
struct RecordingLoader {
    calls: Mutex<Vec<(AggregateId, Vec<String>)>>,
}

impl RecordingLoader {
    fn calls(&self) -> Vec<(AggregateId, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl AggregateRootLoader for RecordingLoader {
    fn load_aggregate_root_from_events<A: AggregateRoot>(
        &self,
        aggregate_id: AggregateId,
        events: Vec<EventEnvelope>,
    ) -> domain::Result<A> {
        let types = events.iter().map(|e| e.event_type.clone()).collect();
        self.calls.lock().unwrap().push((aggregate_id, types));
        ReplayLoader.load_aggregate_root_from_events(aggregate_id, events)
    }
}

/// Bus that checks every published event is already in the store.
#[derive(Clone)]
struct StoreCheckingBus {
    store: InMemoryEventStore,
    inner: InMemoryEventBus,
    missing: Arc<Mutex<Vec<EventEnvelope>>>,
}

impl StoreCheckingBus {
    fn new(store: InMemoryEventStore) -> Self {
        Self {
            store,
            inner: InMemoryEventBus::new(),
            missing: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl EventBus for StoreCheckingBus {
    async fn publish(&self, events: &[EventEnvelope]) -> event_bus::Result<()> {
        for event in events {
            let stream = self
                .store
                .get_events_for_aggregate(event.aggregate_id)
                .await
                .map_err(|e| EventBusError::Rejected(e.to_string()))?;
            if !stream.contains(event) {
                self.missing.lock().unwrap().push(event.clone());
            }
        }
        self.inner.publish(events).await
    }
}

fn repository() -> DomainRepository<InMemoryEventStore, InMemoryEventBus> {
    init_tracing();
    DomainRepository::new(InMemoryEventStore::new(), InMemoryEventBus::new())
}

mod conversion {
    use super::*;

    #[tokio::test]
    async fn every_stored_event_passes_through_the_converter() {
        init_tracing();
        let id = AggregateId::new();
        let store = InMemoryEventStore::with_events([
            stored(id, 1, &FooEvent { label: "a".into() }),
            stored(id, 2, &BarEvent { amount: 4 }),
            stored(id, 3, &BarEvent { amount: 6 }),
        ]);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&calls);
        let converter = EventConverter::new().add_converter(
            BarEvent::EVENT_TYPE,
            move |event: EventEnvelope| -> ConversionResult {
                seen.lock().unwrap().push(event.version);
                bar_v1_to_v2(event)
            },
        );
        let repo = DomainRepository::with_collaborators(
            store,
            InMemoryEventBus::new(),
            converter,
            ReplayLoader,
        );

        let aggregate: MyAggregateRoot = repo.get_by_id(id).await.unwrap();

        assert_eq!(*calls.lock().unwrap(), [Version::new(2), Version::new(3)]);
        assert_eq!(aggregate.foo_labels, ["a"]);
        assert_eq!(aggregate.bar_total, 10);
        assert_eq!(aggregate.bar_notes, ["converted", "converted"]);
        assert!(aggregate.other_events.is_empty());
        assert_eq!(aggregate.version(), Version::new(3));
    }

    #[tokio::test]
    async fn failing_conversion_aborts_the_load() {
        init_tracing();
        let id = AggregateId::new();
        let store = InMemoryEventStore::with_events([stored(id, 1, &BarEvent { amount: 1 })]);
        let converter = EventConverter::new().add_converter(
            BarEvent::EVENT_TYPE,
            |_event: EventEnvelope| -> ConversionResult {
                Err(domain::ConversionFailure::new("unsupported"))
            },
        );
        let repo = DomainRepository::with_collaborators(
            store,
            InMemoryEventBus::new(),
            converter,
            ReplayLoader,
        );

        let result = repo.get_by_id::<MyAggregateRoot>(id).await;
        assert!(matches!(result, Err(DomainError::Conversion { .. })));
    }

    #[tokio::test]
    async fn each_type_is_converted_by_its_own_converter_once_per_event() {
        init_tracing();
        let id = AggregateId::new();
        let store = InMemoryEventStore::with_events([
            stored(id, 1, &FooEvent { label: "a".into() }),
            stored(id, 2, &BarEvent { amount: 4 }),
        ]);
        let foo_calls = Arc::new(Mutex::new(Vec::new()));
        let bar_calls = Arc::new(Mutex::new(Vec::new()));
        let foo_seen = Arc::clone(&foo_calls);
        let bar_seen = Arc::clone(&bar_calls);
        let converter = EventConverter::new()
            .add_converter(
                FooEvent::EVENT_TYPE,
                move |event: EventEnvelope| -> ConversionResult {
                    foo_seen.lock().unwrap().push(event.event_type.clone());
                    Ok(event.upgraded("FooEvent_v2", &event.payload)?)
                },
            )
            .add_converter(
                BarEvent::EVENT_TYPE,
                move |event: EventEnvelope| -> ConversionResult {
                    bar_seen.lock().unwrap().push(event.event_type.clone());
                    bar_v1_to_v2(event)
                },
            );
        let repo = DomainRepository::with_collaborators(
            store,
            InMemoryEventBus::new(),
            converter,
            ReplayLoader,
        );

        let aggregate: MyAggregateRoot = repo.get_by_id(id).await.unwrap();

        assert_eq!(*foo_calls.lock().unwrap(), ["FooEvent"]);
        assert_eq!(*bar_calls.lock().unwrap(), ["BarEvent"]);
        assert_eq!(aggregate.other_events, ["FooEvent_v2"]);
        assert_eq!(aggregate.bar_total, 4);
        assert_eq!(aggregate.version(), Version::new(2));
    }
}

mod loading {
    use super::*;

    #[tokio::test]
    async fn loader_receives_converted_events_in_order() {
        init_tracing();
        let id = AggregateId::new();
        let store = InMemoryEventStore::with_events([
            stored(id, 2, &BarEvent { amount: 2 }),
            stored(id, 1, &FooEvent { label: "x".into() }),
        ]);
        let converter = EventConverter::new().add_converter(BarEvent::EVENT_TYPE, bar_v1_to_v2);
        let repo = DomainRepository::with_collaborators(
            store,
            InMemoryEventBus::new(),
            converter,
            RecordingLoader::default(),
        );

        let aggregate: MyAggregateRoot = repo.get_by_id(id).await.unwrap();

        let calls = repo.loader().calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, id);
        assert_eq!(calls[0].1, ["FooEvent", "BarEvent_v2"]);
        assert_eq!(aggregate.id(), id);
        assert_eq!(aggregate.bar_total, 2);
    }

    #[tokio::test]
    async fn absent_stream_is_not_found_but_empty_stream_loads() {
        let repo = repository();
        let absent = AggregateId::new();
        let empty = AggregateId::new();
        repo.store().create_stream(empty).await.unwrap();

        let err = repo.get_by_id::<MyAggregateRoot>(absent).await.unwrap_err();
        assert!(matches!(err, DomainError::AggregateNotFound { .. }));
        assert!(
            repo.find_by_id::<MyAggregateRoot>(absent)
                .await
                .unwrap()
                .is_none()
        );

        let bare: MyAggregateRoot = repo.get_by_id(empty).await.unwrap();
        assert_eq!(bare.version(), Version::initial());
        assert!(bare.foo_labels.is_empty());
    }

    #[tokio::test]
    async fn unknown_event_types_reach_the_catch_all() {
        let repo = repository();
        let id = AggregateId::new();
        repo.store()
            .append(
                vec![
                    stored(id, 1, &FooEvent { label: "f".into() }),
                    stored_raw(id, 2, "BazEvent"),
                ],
                event_store::AppendOptions::expect_new(),
            )
            .await
            .unwrap();

        let aggregate: MyAggregateRoot = repo.get_by_id(id).await.unwrap();

        assert_eq!(aggregate.foo_labels, ["f"]);
        assert_eq!(aggregate.other_events, ["BazEvent"]);
    }
}

mod saving {
    use super::*;

    #[tokio::test]
    async fn store_receives_events_before_the_bus_in_applied_order() {
        init_tracing();
        let store = InMemoryEventStore::new();
        let bus = StoreCheckingBus::new(store.clone());
        let repo = DomainRepository::new(store, bus);
        let id = AggregateId::new();

        let mut aggregate = MyAggregateRoot::new(id);
        aggregate.foo("first").unwrap();
        aggregate.bar(9).unwrap();
        let version = repo.save(&mut aggregate).await.unwrap();

        assert_eq!(version, Version::new(2));
        assert_eq!(repo.store().append_calls(), 1);

        let stored = repo.store().get_events_for_aggregate(id).await.unwrap();
        let stored_types: Vec<_> = stored.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(stored_types, ["FooEvent", "BarEvent_v2"]);
        assert_eq!(stored[0].version, Version::first());
        assert_eq!(stored[1].version, Version::new(2));

        let published = repo.bus().inner.published_events().await;
        assert_eq!(published, stored);
        assert!(repo.bus().missing.lock().unwrap().is_empty());
        assert!(!aggregate.has_uncommitted_events());
    }

    #[tokio::test]
    async fn saved_aggregate_reloads_equivalent() {
        let repo = repository();
        let id = AggregateId::new();

        let mut original = MyAggregateRoot::new(id);
        original.foo("one").unwrap();
        original.bar(3).unwrap();
        original.foo("two").unwrap();
        repo.save(&mut original).await.unwrap();

        let reloaded: MyAggregateRoot = repo.get_by_id(id).await.unwrap();

        assert_eq!(reloaded.foo_labels, original.foo_labels);
        assert_eq!(reloaded.bar_total, original.bar_total);
        assert_eq!(reloaded.bar_notes, original.bar_notes);
        assert_eq!(reloaded.version(), original.version());
        assert_eq!(reloaded.original_version(), original.original_version());
    }

    #[tokio::test]
    async fn continuing_after_save_appends_to_the_same_stream() {
        let repo = repository();
        let id = AggregateId::new();

        let mut aggregate = MyAggregateRoot::new(id);
        aggregate.foo("a").unwrap();
        repo.save(&mut aggregate).await.unwrap();
        aggregate.bar(1).unwrap();
        let version = repo.save(&mut aggregate).await.unwrap();

        assert_eq!(version, Version::new(2));
        assert_eq!(repo.bus().published_events().await.len(), 2);
    }

    #[tokio::test]
    async fn second_writer_gets_concurrency_error() {
        let repo = repository();
        let id = AggregateId::new();

        let mut seed = MyAggregateRoot::new(id);
        seed.foo("seed").unwrap();
        repo.save(&mut seed).await.unwrap();

        let mut first: MyAggregateRoot = repo.get_by_id(id).await.unwrap();
        let mut second: MyAggregateRoot = repo.get_by_id(id).await.unwrap();
        first.bar(1).unwrap();
        second.bar(2).unwrap();

        repo.save(&mut first).await.unwrap();
        let err = repo.save(&mut second).await.unwrap_err();
        assert!(matches!(err, DomainError::Concurrency { .. }));
        assert!(err.is_retryable());

        // Reload, reapply, retry.
        let mut retried: MyAggregateRoot = repo.get_by_id(id).await.unwrap();
        retried.bar(2).unwrap();
        let version = repo.save(&mut retried).await.unwrap();
        assert_eq!(version, Version::new(3));
        assert_eq!(retried.bar_total, 3);
    }

    #[tokio::test]
    async fn nothing_to_save_is_a_no_op() {
        let repo = repository();
        let mut aggregate = MyAggregateRoot::new(AggregateId::new());

        assert_eq!(
            repo.save(&mut aggregate).await.unwrap(),
            Version::initial()
        );
        assert_eq!(repo.store().append_calls(), 0);
        assert_eq!(repo.bus().publish_calls(), 0);
    }

    #[tokio::test]
    async fn publish_failure_leaves_events_durable_and_buffered() {
        let repo = repository();
        let id = AggregateId::new();
        repo.bus().close();

        let mut aggregate = MyAggregateRoot::new(id);
        aggregate.foo("kept").unwrap();
        let err = repo.save(&mut aggregate).await.unwrap_err();

        assert!(matches!(err, DomainError::PublishFailed { .. }));
        assert!(!err.is_retryable());
        assert_eq!(
            repo.store().get_events_for_aggregate(id).await.unwrap().len(),
            1
        );
        assert_eq!(aggregate.uncommitted_events().len(), 1);

        // The caller acknowledges the stored events and carries on.
        repo.bus().reopen();
        aggregate.mark_changes_as_committed();
        aggregate.bar(5).unwrap();
        assert_eq!(repo.save(&mut aggregate).await.unwrap(), Version::new(2));
    }
}
