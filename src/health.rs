//! Health reporting for the dispatch node.
//!
//! Aggregates the state of the HTTP work queue, the scheduler and the
//! shutdown coordinator into a serializable report.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::scheduler::QueueSummary;
use crate::shutdown::ShutdownState;

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Point-in-time component readings fed to [`HealthChecker::report`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentSnapshot {
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub live_workers: usize,
    pub configured_workers: usize,
    pub in_flight: u32,
    pub servicing_threads: usize,
}

/// Detailed health report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub state: HealthState,
    pub accepting_requests: bool,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub live_workers: usize,
    pub in_flight_requests: u32,
    pub servicing_threads: usize,
    pub scheduler: QueueSummary,
    pub uptime_secs: u64,
}

pub struct HealthChecker {
    start_time: Instant,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    pub fn report(
        &self,
        shutdown_state: ShutdownState,
        components: ComponentSnapshot,
        scheduler: QueueSummary,
    ) -> HealthReport {
        HealthReport {
            state: Self::compute_state(shutdown_state, &components),
            accepting_requests: shutdown_state == ShutdownState::Running,
            queue_depth: components.queue_depth,
            queue_capacity: components.queue_capacity,
            live_workers: components.live_workers,
            in_flight_requests: components.in_flight,
            servicing_threads: components.servicing_threads,
            scheduler,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    /// Unhealthy once shutdown has begun. Degraded when the queue is full,
    /// a worker is missing or nothing services the scheduler.
    fn compute_state(shutdown_state: ShutdownState, c: &ComponentSnapshot) -> HealthState {
        if shutdown_state != ShutdownState::Running {
            return HealthState::Unhealthy;
        }
        if c.queue_depth >= c.queue_capacity
            || c.live_workers < c.configured_workers
            || c.servicing_threads == 0
        {
            return HealthState::Degraded;
        }
        HealthState::Healthy
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}
