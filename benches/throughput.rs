use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use spindle::ThreadPool;

fn bench_spawn_join(c: &mut Criterion) {
    let pool = ThreadPool::new(4);
    c.bench_function("spawn_join_single", |b| {
        b.iter(|| pool.spawn(|| 1u64).unwrap().get())
    });
    pool.close_and_join();
}

fn bench_block_on_fanout(c: &mut Criterion) {
    let pool = ThreadPool::new(4);
    c.bench_function("block_on_fanout_1000", |b| {
        b.iter(|| {
            let sum = Arc::new(AtomicUsize::new(0));
            let pool2 = pool.clone();
            let sum2 = Arc::clone(&sum);
            pool.block_on(move || {
                for i in 0..1000 {
                    let sum3 = Arc::clone(&sum2);
                    let _ = pool2.spawn(move || {
                        sum3.fetch_add(i, Ordering::Relaxed);
                    });
                }
            })
            .unwrap();
            sum.load(Ordering::Relaxed)
        })
    });
    pool.close_and_join();
}

criterion_group!(benches, bench_spawn_join, bench_block_on_fanout);
criterion_main!(benches);
