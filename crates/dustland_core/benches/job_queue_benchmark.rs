//! # Job Queue Benchmark
//!
//! Measures the cost of the shared queue and of a full barrier round.
//!
//! Run with: `cargo bench --package dustland_core`

// Benchmarks don't need docs
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dustland_core::{
    DispatchTable, Job, JobKind, JobOutcome, JobQueue, LogicPool, PoolConfig, WorkerContext,
};
use std::sync::Arc;

/// Benchmark: push then pop on an uncontended queue.
fn bench_push_pop(c: &mut Criterion) {
    let queue = JobQueue::with_capacity(4096);
    c.bench_function("queue_push_pop", |b| {
        b.iter(|| {
            queue.push_back(black_box(Job::recurring(JobKind::Critter, 7)));
            black_box(queue.try_pop_front())
        });
    });
}

/// Benchmark: a lap of 1000 recurring jobs through the tail.
fn bench_requeue_lap(c: &mut Criterion) {
    let queue = JobQueue::with_capacity(4096);
    for id in 0..1000 {
        queue.push_back(Job::recurring(JobKind::Map, id));
    }
    c.bench_function("queue_requeue_lap_1000", |b| {
        b.iter(|| {
            for _ in 0..1000 {
                if let Some(job) = queue.try_pop_front() {
                    queue.push_back(job);
                }
            }
        });
    });
}

/// Benchmark: synchronize + release with 4 busy workers.
fn bench_barrier_round(c: &mut Criterion) {
    let table = DispatchTable::new()
        .with(JobKind::Critter, |_: &Job, _: &WorkerContext<'_>| JobOutcome::Done)
        .expect("fresh table");
    let queue = Arc::new(JobQueue::new());
    let (pool, mut controller) =
        LogicPool::start(&PoolConfig::with_workers(4), Arc::clone(&queue), table)
            .expect("pool starts");
    for id in 0..256 {
        queue.push_back(Job::recurring(JobKind::Critter, id));
    }

    c.bench_function("barrier_round_4_workers", |b| {
        b.iter(|| {
            let guard = controller.synchronize();
            black_box(guard.generation());
        });
    });

    pool.shutdown(controller).expect("clean shutdown");
}

criterion_group!(benches, bench_push_pop, bench_requeue_lap, bench_barrier_round);
criterion_main!(benches);
