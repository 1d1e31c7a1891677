use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use event_store::{
    AggregateId, AppendOptions, EventEnvelope, EventStore, InMemoryEventStore, Version,
};

fn make_event(aggregate_id: AggregateId, version: i64) -> EventEnvelope {
    EventEnvelope::builder()
        .aggregate_id(aggregate_id)
        .aggregate_type("Account")
        .event_type("FundsDeposited")
        .version(Version::new(version))
        .payload_raw(serde_json::json!({ "amount": version * 10 }))
        .build()
}

fn bench_append_in_batches(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("event_store/append_batch");

    for size in [1_i64, 10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                rt.block_on(async {
                    let store = InMemoryEventStore::new();
                    let id = AggregateId::new();
                    let events: Vec<_> = (1..=size).map(|v| make_event(id, v)).collect();
                    store
                        .append(events, AppendOptions::expect_new())
                        .await
                        .unwrap();
                });
            });
        });
    }
    group.finish();
}

fn bench_read_stream(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let id = AggregateId::new();
    let store = InMemoryEventStore::with_events((1..=1_000).map(|v| make_event(id, v)));

    c.bench_function("event_store/read_stream_1000", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.get_events_for_aggregate(id).await.unwrap();
            });
        });
    });
}

criterion_group!(benches, bench_append_in_batches, bench_read_stream);
criterion_main!(benches);
