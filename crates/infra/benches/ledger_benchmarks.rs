use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use tokio::runtime::Runtime;

use stockledger_core::{LocationId, ProductId};
use stockledger_events::{EventEnvelope, InMemoryEventBus};
use stockledger_infra::{HistoryFilter, InMemoryStockStore, StockLedger};
use stockledger_inventory::{ChangeType, StockEvent};

type Ledger = StockLedger<InMemoryStockStore, Arc<InMemoryEventBus<EventEnvelope<StockEvent>>>>;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("failed to build runtime")
}

fn setup(rt: &Runtime) -> (Ledger, ProductId) {
    let ledger = StockLedger::new(InMemoryStockStore::new(), Arc::new(InMemoryEventBus::new()));
    let product = rt
        .block_on(ledger.register_product("bench", 10))
        .expect("register product");
    (ledger, product.product_id)
}

fn bench_movements(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("stock_movements");
    group.throughput(Throughput::Elements(1));

    group.bench_function("receive", |b| {
        let (ledger, p) = setup(&rt);
        b.iter(|| {
            rt.block_on(ledger.receive(black_box(p), LocationId::new(1), 1))
                .expect("receive")
        });
    });

    group.bench_function("receive_then_ship", |b| {
        let (ledger, p) = setup(&rt);
        b.iter(|| {
            rt.block_on(async {
                ledger.receive(p, LocationId::new(1), 2).await.expect("receive");
                ledger.ship(p, LocationId::new(1), 1).await.expect("ship")
            })
        });
    });

    group.bench_function("rejected_ship", |b| {
        let (ledger, p) = setup(&rt);
        rt.block_on(ledger.receive(p, LocationId::new(1), 1))
            .expect("receive");
        b.iter(|| {
            let rejected = rt.block_on(ledger.ship(p, LocationId::new(1), black_box(5)));
            assert!(rejected.is_err());
        });
    });

    group.finish();
}

fn bench_history(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("history_query");

    for events in [100usize, 1_000, 10_000] {
        let (ledger, p) = setup(&rt);
        rt.block_on(async {
            for i in 0..events {
                ledger
                    .receive(p, LocationId::new((i % 8) as i64), 1)
                    .await
                    .expect("receive");
            }
        });

        group.throughput(Throughput::Elements(events as u64));
        group.bench_with_input(BenchmarkId::from_parameter(events), &events, |b, _| {
            b.iter(|| {
                rt.block_on(ledger.history(&HistoryFilter::new(ChangeType::Receive).for_product(p)))
                    .expect("history")
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_movements, bench_history);
criterion_main!(benches);
