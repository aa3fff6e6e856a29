use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use std::collections::HashMap;

use lendstock_core::{Aggregate, AggregateId, ExpectedVersion, StoreId};
use lendstock_infra::event_store::{Commit, EventStore, InMemoryLendingStore, StreamBatch};
use lendstock_ledger::{
    ITEM_AGGREGATE_TYPE, ItemId, RegisterItem, ReleaseStock, ReserveStock, StockCommand,
    StockEvent, StockItem,
};

/// Naive CRUD simulation: direct read-modify-write on a map, no events, no
/// history. The baseline the event-sourced pipeline is compared against.
struct NaiveCrudStore {
    inner: HashMap<ItemId, i64>,
}

impl NaiveCrudStore {
    fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    fn register(&mut self, item_id: ItemId, quantity: i64) {
        self.inner.insert(item_id, quantity);
    }

    fn reserve(&mut self, item_id: ItemId, quantity: i64) -> Result<(), ()> {
        let on_shelf = self.inner.get_mut(&item_id).ok_or(())?;
        if *on_shelf < quantity {
            return Err(());
        }
        *on_shelf -= quantity;
        Ok(())
    }

    fn release(&mut self, item_id: ItemId, quantity: i64) {
        if let Some(on_shelf) = self.inner.get_mut(&item_id) {
            *on_shelf += quantity;
        }
    }
}

fn registered_store(quantity: u32) -> (InMemoryLendingStore, ItemId) {
    let store = InMemoryLendingStore::new();
    let item_id = ItemId::new(AggregateId::new());
    let item = StockItem::empty(item_id);

    let events = item
        .handle(&StockCommand::RegisterItem(RegisterItem {
            item_id,
            store_id: StoreId::new(),
            name: "bench item".to_string(),
            initial_quantity: quantity,
            min_level: 0,
            max_level: None,
            occurred_at: Utc::now(),
        }))
        .expect("register command");

    let batch = StreamBatch::from_typed(
        item_id.0,
        ITEM_AGGREGATE_TYPE,
        ExpectedVersion::Exact(0),
        &events,
    )
    .expect("register batch");
    store
        .commit(Commit::new().with_batch(batch))
        .expect("register commit");

    (store, item_id)
}

/// One event-sourced reserve+release cycle: load, rehydrate, decide, commit.
fn event_sourced_cycle(store: &InMemoryLendingStore, item_id: ItemId) {
    for cmd in [
        StockCommand::ReserveStock(ReserveStock {
            item_id,
            quantity: 1,
            occurred_at: Utc::now(),
        }),
        StockCommand::ReleaseStock(ReleaseStock {
            item_id,
            quantity: 1,
            occurred_at: Utc::now(),
        }),
    ] {
        let history = store.load_stream(item_id.0).expect("load stream");
        let version = history.last().map(|e| e.sequence_number).unwrap_or(0);

        let mut item = StockItem::empty(item_id);
        for stored in &history {
            let ev: StockEvent =
                serde_json::from_value(stored.payload.clone()).expect("event payload");
            item.apply(&ev);
        }

        let events = item.handle(&cmd).expect("cycle command");
        let batch = StreamBatch::from_typed(
            item_id.0,
            ITEM_AGGREGATE_TYPE,
            ExpectedVersion::Exact(version),
            &events,
        )
        .expect("cycle batch");
        store
            .commit(Commit::new().with_batch(batch))
            .expect("cycle commit");
    }
}

fn bench_reserve_release_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("reserve_release_cycle");
    group.throughput(Throughput::Elements(1));

    group.bench_function("naive_crud", |b| {
        b.iter_batched_ref(
            || {
                let mut store = NaiveCrudStore::new();
                let item_id = ItemId::new(AggregateId::new());
                store.register(item_id, 100);
                (store, item_id)
            },
            |(store, item_id)| {
                store.reserve(black_box(*item_id), 1).expect("reserve");
                store.release(black_box(*item_id), 1);
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("event_sourced", |b| {
        b.iter_batched_ref(
            || registered_store(100),
            |(store, item_id)| event_sourced_cycle(store, black_box(*item_id)),
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn bench_rehydration(c: &mut Criterion) {
    let mut group = c.benchmark_group("rehydration");

    for stream_len in [10u32, 100, 1000] {
        let (store, item_id) = registered_store(u32::MAX / 2);

        // Grow the stream with alternating reserve/release pairs.
        for _ in 0..(stream_len / 2) {
            event_sourced_cycle(&store, item_id);
        }

        group.throughput(Throughput::Elements(u64::from(stream_len)));
        group.bench_with_input(
            BenchmarkId::from_parameter(stream_len),
            &stream_len,
            |b, _| {
                b.iter(|| {
                    let history = store.load_stream(item_id.0).expect("load stream");
                    let mut item = StockItem::empty(item_id);
                    for stored in &history {
                        let ev: StockEvent =
                            serde_json::from_value(stored.payload.clone()).expect("event payload");
                        item.apply(&ev);
                    }
                    black_box(item.on_shelf())
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_reserve_release_cycle, bench_rehydration);
criterion_main!(benches);
