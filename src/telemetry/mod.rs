//! Telemetry for the dispatch node.
//!
//! Structured logging, per-request spans and metrics. Metrics go through
//! the `metrics` facade and are no-ops until a recorder is installed.

mod logging;
mod metrics;
mod spans;

use std::any::Any;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use self::metrics::{
    record_admission, record_event_fired, record_queue_depth, record_reply,
    record_scheduler_backlog, record_task_panic, record_work_item_duration,
};
pub use spans::RequestSpan;

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
