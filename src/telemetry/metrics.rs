//! Metric names and recording helpers.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

/// Outcome of admitting one request (`enqueued`, `forbidden`, ...).
pub fn record_admission(outcome: &'static str) {
    counter!("node_http_admissions_total", "outcome" => outcome).increment(1);
}

pub fn record_queue_depth(depth: usize) {
    gauge!("node_work_queue_depth").set(depth as f64);
}

pub fn record_reply(status: u16) {
    counter!("node_http_replies_total", "status" => status.to_string()).increment(1);
}

pub fn record_work_item_duration(kind: &'static str, elapsed: Duration) {
    histogram!("node_work_item_seconds", "kind" => kind).record(elapsed.as_secs_f64());
}

/// A work item, scheduled job or loop event that panicked.
pub fn record_task_panic(source: &'static str) {
    counter!("node_task_panics_total", "source" => source).increment(1);
}

pub fn record_scheduler_backlog(pending: usize) {
    gauge!("node_scheduler_pending").set(pending as f64);
}

pub fn record_event_fired() {
    counter!("node_event_loop_events_total").increment(1);
}
