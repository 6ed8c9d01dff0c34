//! End-to-end node start, request handling and ordered shutdown.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use node_dispatch::health::HealthState;
use node_dispatch::http::{Admission, HttpConfig, HttpStatus};
use node_dispatch::shutdown::{ShutdownResult, ShutdownState};
use node_dispatch::{Node, NodeConfig};

use common::{expect_reply, request, wait_until};

fn config() -> NodeConfig {
    NodeConfig {
        http: HttpConfig {
            thread_name_prefix: "lifecycle".into(),
            worker_threads: 2,
            ..Default::default()
        },
        shutdown_timeout_secs: 5,
        ..Default::default()
    }
}

#[test]
fn serves_health_from_a_handler() {
    let node = Node::start(config()).unwrap();
    let probe = node.health_probe();
    node.register_handler("/health", true, move |req, _| {
        let body = serde_json::to_vec(&probe.report()).unwrap_or_default();
        req.write_reply(HttpStatus::Ok, body);
    });

    wait_until(|| node.health_report().live_workers == 2);

    let (incoming, rx) = request("GET", "/health");
    assert_eq!(node.dispatcher().dispatch(incoming), Admission::Enqueued);
    let reply = expect_reply(&rx);
    assert_eq!(reply.code(), 200);
    assert_eq!(reply.thread.as_deref(), Some("lifecycle-http"));

    let json: serde_json::Value = serde_json::from_slice(&reply.reply.body).unwrap();
    assert_eq!(json["accepting_requests"], true);
    assert_eq!(json["live_workers"], 2);

    assert_eq!(node.shutdown().unwrap(), ShutdownResult::Complete);
}

#[test]
fn handler_can_defer_work_to_the_scheduler() {
    let node = Node::start(config()).unwrap();
    let scheduler = Arc::clone(node.scheduler());
    let (ran_tx, ran_rx) = mpsc::channel();
    let ran_tx = Mutex::new(ran_tx);
    node.register_handler("/later", true, move |req, _| {
        let tx = ran_tx.lock().unwrap().clone();
        scheduler.schedule_from_now(
            move || {
                let name = thread::current().name().map(str::to_string);
                tx.send(name).unwrap();
            },
            Duration::from_millis(10),
        );
        req.write_reply(HttpStatus::Ok, "scheduled");
    });

    let (incoming, rx) = request("POST", "/later");
    node.dispatcher().dispatch(incoming);
    assert_eq!(expect_reply(&rx).body_text(), "scheduled");

    let ran_on = ran_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(ran_on.as_deref(), Some("lifecycle-scheduler"));
    node.shutdown().unwrap();
}

#[test]
fn shutdown_waits_for_running_handlers_then_rejects() {
    let node = Node::start(config()).unwrap();
    let (started_tx, started_rx) = mpsc::channel();
    let started_tx = Mutex::new(started_tx);
    node.register_handler("/slow", true, move |req, _| {
        started_tx.lock().unwrap().send(()).unwrap();
        thread::sleep(Duration::from_millis(100));
        req.write_reply(HttpStatus::Ok, "finished");
    });

    let (incoming, rx) = request("POST", "/slow");
    node.dispatcher().dispatch(incoming);
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let dispatcher = node.dispatcher();
    let probe = node.health_probe();
    assert_eq!(node.shutdown().unwrap(), ShutdownResult::Complete);

    assert_eq!(expect_reply(&rx).body_text(), "finished");
    assert!(!dispatcher.is_accepting());
    let report = probe.report();
    assert_eq!(report.state, HealthState::Unhealthy);
    assert_eq!(report.live_workers, 0);
    assert_eq!(report.servicing_threads, 0);
}

#[test]
fn recurring_job_stops_with_the_node() {
    let node = Node::start(config()).unwrap();
    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = ticks.clone();
    let _handle = node.scheduler().schedule_every(
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        },
        Duration::from_millis(10),
    );
    wait_until(|| ticks.load(Ordering::SeqCst) >= 2);

    let scheduler = Arc::clone(node.scheduler());
    node.shutdown().unwrap();
    let after_stop = ticks.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    assert!(scheduler.is_stopping());
}

#[test]
fn dropping_a_running_node_stops_it() {
    let node = Node::start(config()).unwrap();
    let probe = node.health_probe();
    assert_eq!(node.state(), ShutdownState::Running);
    drop(node);

    let report = probe.report();
    assert!(!report.accepting_requests);
    assert_eq!(report.live_workers, 0);
}
