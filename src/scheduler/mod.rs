//! Time-ordered scheduler for background jobs.
//!
//! Jobs are one-shot callables keyed by deadline. A recurring job is a job
//! that schedules its successor when it finishes.

mod repeat;
mod service;
mod timeline;

pub use repeat::RepeatHandle;
pub use service::{SchedulerConfig, SchedulerError, ServiceThreads};
pub use timeline::{Job, QueueInfo, QueueSummary, Scheduler};
