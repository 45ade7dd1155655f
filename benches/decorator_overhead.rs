use bulwark::ResilientConnection;
use bulwark_core_interface::mock::MockDatabase;
use bulwark_core_interface::{CancelSignal, DbError, NativeCommand, NativeConnection, Value};
use bulwark_core_resilience::{Backoff, Policy, RetryPolicy, TimeoutPolicy};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use std::time::Duration;

fn chain(depth: usize) -> Vec<Policy<DbError>> {
    (0..depth)
        .map(|i| {
            if i % 2 == 0 {
                RetryPolicy::on_fault(|e: &DbError| e.code() == Some(1205))
                    .max_retries(3)
                    .backoff(Backoff::none())
                    .into()
            } else {
                TimeoutPolicy::optimistic(Duration::from_secs(30)).into()
            }
        })
        .collect()
}

/// Cost of routing a call through policy chains of increasing depth
fn bench_blocking_scalar(c: &mut Criterion) {
    let db = MockDatabase::new();
    db.set_scalar(Value::Int(1));
    let mut group = c.benchmark_group("blocking_scalar");

    let mut native = db.connect("Database=bench").create_command();
    group.bench_function("native", |b| {
        b.iter(|| black_box(native.execute_scalar(&CancelSignal::new()).unwrap()))
    });

    for depth in [1, 2, 4, 8] {
        let conn =
            ResilientConnection::with_policies(db.connect("Database=bench"), chain(depth), chain(depth))
                .unwrap();
        let mut command = conn.create_command();
        group.bench_with_input(BenchmarkId::new("resilient", depth), &depth, |b, _| {
            b.iter(|| black_box(command.execute_scalar(&CancelSignal::new()).unwrap()))
        });
    }

    group.finish();
}

fn bench_async_scalar(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    let db = MockDatabase::new();
    let mut group = c.benchmark_group("async_scalar");

    for depth in [1, 4] {
        let conn =
            ResilientConnection::with_policies(db.connect("Database=bench"), chain(depth), chain(depth))
                .unwrap();
        let mut command = conn.create_command();
        group.bench_with_input(BenchmarkId::new("resilient", depth), &depth, |b, _| {
            b.iter(|| {
                runtime.block_on(async {
                    black_box(command.execute_scalar_async(CancelSignal::new()).await.unwrap())
                })
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_blocking_scalar, bench_async_scalar);
criterion_main!(benches);
