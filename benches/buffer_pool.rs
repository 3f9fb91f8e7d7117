//! Buffer pool benchmarks.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use mediagraph::memory::{AcquirePolicy, BufferPool};
use mediagraph::metadata::Metadata;
use std::hint::black_box;
use std::sync::Arc;

fn bench_pool_acquire_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_acquire_release");

    for capacity in [16, 64, 256, 1024] {
        let pool = BufferPool::new("bench", 1024, capacity, AcquirePolicy::Fail);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &pool, |b, pool| {
            b.iter(|| {
                let buffer = pool.acquire(1024).expect("pool not exhausted");
                drop(black_box(buffer));
            });
        });
    }

    group.finish();
}

fn bench_pool_into_shared(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_into_shared");
    let pool = BufferPool::new("bench", 64 * 1024, 8, AcquirePolicy::Fail);

    group.throughput(Throughput::Elements(1));
    group.bench_function("acquire_fill_share_4", |b| {
        b.iter(|| {
            let mut buffer = pool.acquire(64 * 1024).expect("pool not exhausted");
            buffer.data_mut()[0] = 1;
            *buffer.metadata_mut() = Metadata::from_sequence(1);
            let shared = buffer.into_buffer();
            let clones = [shared.clone(), shared.clone(), shared.clone(), shared];
            black_box(&clones);
        });
    });

    group.finish();
}

fn bench_pool_concurrent(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_concurrent");
    let pool = BufferPool::new("bench", 1024, 8, AcquirePolicy::Block);

    group.throughput(Throughput::Elements(400));
    group.bench_function("4_threads_100_ops_each", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let pool = Arc::clone(&pool);
                    std::thread::spawn(move || {
                        for _ in 0..100 {
                            let buffer = pool.acquire(512).expect("blocking acquire");
                            black_box(buffer.len());
                        }
                    })
                })
                .collect();

            for h in handles {
                h.join().unwrap();
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_pool_acquire_release,
    bench_pool_into_shared,
    bench_pool_concurrent
);
criterion_main!(benches);
