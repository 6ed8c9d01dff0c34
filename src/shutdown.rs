//! Graceful shutdown coordination for the dispatch node.
//!
//! Tracks whether new requests are still admitted and how many admitted
//! requests have not had their reply transmitted yet.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Shutdown state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

/// Result of waiting for in-flight requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownResult {
    Complete,
    Timeout { remaining: u32 },
}

struct Inner {
    state: Mutex<Tracked>,
    drained: Condvar,
}

struct Tracked {
    state: ShutdownState,
    in_flight: u32,
}

/// Coordinates graceful shutdown across node components. Cheap to clone.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(Tracked {
                    state: ShutdownState::Running,
                    in_flight: 0,
                }),
                drained: Condvar::new(),
            }),
        }
    }

    pub fn state(&self) -> ShutdownState {
        self.inner.state.lock().state
    }

    /// Check if accepting new requests.
    pub fn is_accepting(&self) -> bool {
        self.state() == ShutdownState::Running
    }

    /// Track an in-flight request. Returns None if shutting down.
    pub fn track(&self) -> Option<InFlightGuard> {
        let mut tracked = self.inner.state.lock();
        if tracked.state != ShutdownState::Running {
            return None;
        }
        tracked.in_flight += 1;
        Some(InFlightGuard {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Current in-flight request count.
    pub fn in_flight_count(&self) -> u32 {
        self.inner.state.lock().in_flight
    }

    /// Stop accepting. Idempotent; never moves back from `Stopped`.
    pub fn begin_drain(&self) {
        let mut tracked = self.inner.state.lock();
        if tracked.state == ShutdownState::Running {
            tracked.state = ShutdownState::Draining;
        }
    }

    /// Block until no request is in flight or `timeout` passes.
    pub fn wait_for_drain(&self, timeout: Duration) -> ShutdownResult {
        let deadline = Instant::now().checked_add(timeout);
        let mut tracked = self.inner.state.lock();
        while tracked.in_flight > 0 {
            let Some(deadline) = deadline else {
                self.inner.drained.wait(&mut tracked);
                continue;
            };
            if self
                .inner
                .drained
                .wait_until(&mut tracked, deadline)
                .timed_out()
            {
                break;
            }
        }
        match tracked.in_flight {
            0 => ShutdownResult::Complete,
            remaining => ShutdownResult::Timeout { remaining },
        }
    }

    /// Stop accepting and wait for the drain.
    pub fn initiate(&self, timeout: Duration) -> ShutdownResult {
        self.begin_drain();
        self.wait_for_drain(timeout)
    }

    pub fn finish(&self) {
        self.inner.state.lock().state = ShutdownState::Stopped;
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for in-flight request tracking.
pub struct InFlightGuard {
    inner: Arc<Inner>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut tracked = self.inner.state.lock();
        tracked.in_flight -= 1;
        if tracked.in_flight == 0 {
            self.inner.drained.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn starts_running_and_tracks_requests() {
        let coordinator = ShutdownCoordinator::new();
        assert_eq!(coordinator.state(), ShutdownState::Running);
        assert!(coordinator.is_accepting());

        let guard = coordinator.track().unwrap();
        assert_eq!(coordinator.in_flight_count(), 1);
        drop(guard);
        assert_eq!(coordinator.in_flight_count(), 0);
    }

    #[test]
    fn draining_refuses_new_requests() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.begin_drain();
        assert_eq!(coordinator.state(), ShutdownState::Draining);
        assert!(!coordinator.is_accepting());
        assert!(coordinator.track().is_none());
    }

    #[test]
    fn drain_completes_when_guards_drop() {
        let coordinator = ShutdownCoordinator::new();
        let guard = coordinator.track().unwrap();

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            drop(guard);
        });

        let result = coordinator.initiate(Duration::from_secs(5));
        assert_eq!(result, ShutdownResult::Complete);
        releaser.join().unwrap();
    }

    #[test]
    fn drain_times_out_with_remaining_count() {
        let coordinator = ShutdownCoordinator::new();
        let _a = coordinator.track().unwrap();
        let _b = coordinator.track().unwrap();

        let result = coordinator.initiate(Duration::from_millis(20));
        assert_eq!(result, ShutdownResult::Timeout { remaining: 2 });
    }

    #[test]
    fn finish_is_terminal() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.finish();
        coordinator.begin_drain();
        assert_eq!(coordinator.state(), ShutdownState::Stopped);
    }
}
