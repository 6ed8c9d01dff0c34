//! Dispatch throughput benchmarks.
//!
//! Measures the full admission path: dispatch, worker execution and reply
//! delivery on the I/O thread.

use std::sync::mpsc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use node_dispatch::http::{
    HttpConfig, HttpServer, HttpStatus, IncomingRequest, Reply, RequestMethod,
};
use node_dispatch::shutdown::ShutdownCoordinator;
use node_dispatch::workqueue::{Task, WorkQueue};

fn server(workers: usize) -> HttpServer {
    let config = HttpConfig {
        worker_threads: workers,
        work_queue_depth: 4096,
        thread_name_prefix: "bench".into(),
        ..Default::default()
    };
    let mut server = HttpServer::init(config, ShutdownCoordinator::new()).unwrap();
    server.start().unwrap();
    server.register_handler("/echo", false, |mut req, _| {
        let body = req.read_body();
        req.write_reply(HttpStatus::Ok, body);
    });
    server
}

fn bench_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_round_trip");

    for workers in [1, 4] {
        let server = server(workers);
        let dispatcher = server.dispatcher();
        let peer = "127.0.0.1:9000".parse().unwrap();

        group.throughput(Throughput::Elements(64));
        group.bench_function(BenchmarkId::new("workers", workers), |b| {
            b.iter(|| {
                let mut replies = Vec::with_capacity(64);
                for _ in 0..64 {
                    let (tx, rx) = tokio::sync::oneshot::channel::<Reply>();
                    let incoming = IncomingRequest::new("POST", "/echo/x", tx)
                        .with_body(b"ping".to_vec())
                        .with_peer(peer);
                    black_box(dispatcher.dispatch(incoming));
                    replies.push(rx);
                }
                for rx in replies {
                    let _ = black_box(rx.blocking_recv());
                }
            })
        });
    }

    group.finish();
}

fn bench_rejection(c: &mut Criterion) {
    let server = server(1);
    let dispatcher = server.dispatcher();

    c.bench_function("dispatch_not_found", |b| {
        b.iter(|| {
            let (tx, rx) = tokio::sync::oneshot::channel::<Reply>();
            let incoming = IncomingRequest::new("GET", "/missing", tx)
                .with_peer("127.0.0.1:9000".parse().unwrap());
            black_box(dispatcher.dispatch(incoming));
            let _ = rx.blocking_recv();
        })
    });
}

fn bench_queue_handoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("work_queue");
    group.throughput(Throughput::Elements(1));
    group.bench_function("enqueue_run", |b| {
        let queue = std::sync::Arc::new(WorkQueue::<Task>::new(1024));
        let worker = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.run())
        };
        b.iter(|| {
            let (tx, rx) = mpsc::channel();
            let _ = queue.enqueue(Box::new(move || {
                let _ = tx.send(());
            }));
            let _ = rx.recv();
        });
        queue.interrupt();
        let _ = worker.join();
    });
    group.finish();

    c.bench_function("method_parse", |b| {
        b.iter(|| black_box(RequestMethod::parse(black_box("POST"))))
    });
}

criterion_group!(benches, bench_round_trip, bench_rejection, bench_queue_handoff);
criterion_main!(benches);
