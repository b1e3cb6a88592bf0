//! Future, coroutine and pool benchmark suite.
//!
//! Benchmarks the hot paths a host pays for on every offloaded call:
//! - Settling a future and delivering its callbacks through a run loop
//! - Driving a coroutine across several awaited futures
//! - Round trips through the thread pool

#![allow(missing_docs)]
#![allow(clippy::semicolon_if_nothing_returned)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use cofuture::{Coroutine, Future, ImmediateScheduler, Resume, RunLoopScheduler, Step, ThreadPool};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// CALLBACK DELIVERY
// =============================================================================

fn bench_callback_delivery(c: &mut Criterion) {
    let mut group = c.benchmark_group("callback_delivery");
    let run_loop = RunLoopScheduler::new(ThreadPool::new(1));
    let sched = run_loop.handle();

    for subscribers in [1usize, 4, 16] {
        group.throughput(Throughput::Elements(subscribers as u64));
        group.bench_with_input(
            BenchmarkId::new("set_done_then_pump", subscribers),
            &subscribers,
            |b, &subscribers| {
                let hits = Arc::new(AtomicUsize::new(0));
                b.iter(|| {
                    let future: Future<u64> = Future::new(&sched);
                    for _ in 0..subscribers {
                        let hits = Arc::clone(&hits);
                        future.on_done(move |v| {
                            hits.fetch_add(black_box(v) as usize, Ordering::Relaxed);
                        });
                    }
                    future.set_done(1).expect("set_done");
                    black_box(run_loop.run_pending())
                });
            },
        );
    }
    group.finish();
}

// =============================================================================
// COROUTINE DRIVING
// =============================================================================

fn bench_coroutine_awaits(c: &mut Criterion) {
    let mut group = c.benchmark_group("coroutine_awaits");
    let run_loop = RunLoopScheduler::new(ThreadPool::new(1));
    let sched = run_loop.handle();

    for awaits in [1u32, 8, 32] {
        group.bench_with_input(BenchmarkId::new("completed_futures", awaits), &awaits, |b, &awaits| {
            b.iter(|| {
                let sched_inner = sched.clone();
                let mut remaining = awaits;
                let co: Coroutine<u32> = Coroutine::spawn(&sched, move |input: Resume| {
                    if !input.is_start() && remaining == 0 {
                        return input.then(Step::Done);
                    }
                    remaining = remaining.saturating_sub(1);
                    Step::await_on(&Future::completed(&sched_inner, remaining))
                });
                run_loop.run_pending();
                black_box(co.result().expect("done"))
            });
        });
    }
    group.finish();
}

// =============================================================================
// POOL ROUND TRIPS
// =============================================================================

fn bench_pool_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_round_trip");
    group.measurement_time(Duration::from_secs(3));

    for threads in [1usize, 4] {
        let sched = ImmediateScheduler::handle(ThreadPool::new(threads));
        group.throughput(Throughput::Elements(64));
        group.bench_with_input(BenchmarkId::new("batch_64", threads), &threads, |b, _| {
            b.iter(|| {
                let futures: Vec<_> = (0..64u64).map(|i| sched.async_call(move || i * 2)).collect();
                let sum: u64 = futures
                    .iter()
                    .map(|future| future.wait().expect("value"))
                    .sum();
                black_box(sum)
            });
        });
        sched.shutdown();
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_callback_delivery,
    bench_coroutine_awaits,
    bench_pool_round_trip
);
criterion_main!(benches);
