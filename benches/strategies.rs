use std::sync::Arc;

use contesa::config::Config;
use contesa::dispatcher::Dispatcher;
use contesa::stall::Stall;
use contesa::store::MemoryStore;
use contesa::strategy::StrategyKind;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

const ALLOCATIONS: usize = 1_000;

fn bench_sequential_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_allocation");

    for kind in StrategyKind::ALL {
        group.bench_function(
            BenchmarkId::new(kind.name(), format!("{}allocs", ALLOCATIONS)),
            |b| {
                b.iter(|| {
                    let dispatcher = Dispatcher::new(
                        Arc::new(MemoryStore::new()),
                        Config::new().with_stall(Stall::none()),
                    );
                    for _ in 0..ALLOCATIONS {
                        black_box(dispatcher.handle(kind).ok());
                    }
                    black_box(dispatcher.list_rows().map(|rows| rows.len()).ok())
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_sequential_allocation);
criterion_main!(benches);
