//! Scheduler benchmarks.
//!
//! Measures insertion into the timeline and the latency of due jobs.

use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use node_dispatch::scheduler::{Scheduler, SchedulerConfig, ServiceThreads};

fn bench_schedule(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_insert");

    for (name, backlog) in [("empty", 0), ("backlog_1k", 1_000), ("backlog_10k", 10_000)] {
        let scheduler = Scheduler::new();
        let far = Instant::now() + Duration::from_secs(3600);
        for i in 0..backlog {
            scheduler.schedule(|| {}, far + Duration::from_millis(i));
        }

        group.throughput(Throughput::Elements(1));
        group.bench_function(BenchmarkId::new("schedule", name), |b| {
            b.iter(|| scheduler.schedule(|| {}, black_box(far)))
        });
        black_box(scheduler.queue_info());
    }

    group.finish();
}

fn bench_due_latency(c: &mut Criterion) {
    let scheduler = Arc::new(Scheduler::new());
    let mut threads =
        ServiceThreads::spawn(&scheduler, &SchedulerConfig::default(), "bench").unwrap();

    c.bench_function("scheduler_immediate_job", |b| {
        b.iter(|| {
            let (tx, rx) = mpsc::channel();
            scheduler.schedule_from_now(
                move || {
                    let _ = tx.send(());
                },
                Duration::ZERO,
            );
            let _ = rx.recv();
        })
    });

    threads.stop(false);
}

criterion_group!(benches, bench_schedule, bench_due_latency);
criterion_main!(benches);
