use criterion::{Criterion, criterion_group, criterion_main};
use event_store::{
    AggregateId, EventStore, EventStoreExt, EventTypeQuery, InMemoryEventStore, NewEvent, Version,
};

fn make_event(event_type: &str) -> NewEvent {
    let payload = serde_json::json!({ "sku": "SKU-001", "qty": 2 });
    NewEvent::new(event_type, serde_json::to_vec(&payload).unwrap())
}

async fn populate(store: &InMemoryEventStore, aggregate_id: &AggregateId, count: usize) {
    let events = (0..count).map(|_| make_event("ItemAdded")).collect();
    store
        .append(aggregate_id, "Cart", Version::initial(), events)
        .await
        .unwrap();
}

fn bench_append_single_event(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/append_single_event", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let agg_id = AggregateId::new();
                store
                    .append_one(&agg_id, "Cart", Version::initial(), make_event("CartOpened"))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_append_batch_10(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/append_batch_10", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                populate(&store, &AggregateId::new(), 10).await;
            });
        });
    });
}

fn bench_load_events(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    let agg_id = AggregateId::new();

    rt.block_on(populate(&store, &agg_id, 100));

    c.bench_function("event_store/load_events_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.load_all_events(&agg_id).await.unwrap();
            });
        });
    });

    c.bench_function("event_store/load_events_after_90", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.load_events(&agg_id, Version::new(90)).await.unwrap();
            });
        });
    });
}

fn bench_load_events_by_type(c: &mut Criterion) {
    use futures_util::StreamExt;

    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();

    // 1000 events across 10 aggregates
    rt.block_on(async {
        for _ in 0..10 {
            populate(&store, &AggregateId::new(), 100).await;
        }
    });

    c.bench_function("event_store/stream_1000_by_type", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut stream = store
                    .load_events_by_type(EventTypeQuery::new("ItemAdded"))
                    .await
                    .unwrap();
                let mut count = 0;
                while let Some(result) = stream.next().await {
                    result.unwrap();
                    count += 1;
                }
                assert_eq!(count, 1000);
            });
        });
    });
}

criterion_group!(
    benches,
    bench_append_single_event,
    bench_append_batch_10,
    bench_load_events,
    bench_load_events_by_type,
);
criterion_main!(benches);
