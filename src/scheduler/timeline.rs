//! Deadline-ordered job set and the servicing loop.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::repeat::RepeatHandle;
use crate::telemetry;

/// A deferred callable.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Snapshot of the pending jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueInfo {
    pub count: usize,
    pub first: Option<Instant>,
    pub last: Option<Instant>,
}

impl QueueInfo {
    pub fn first_utc(&self) -> Option<DateTime<Utc>> {
        self.first.map(instant_to_utc)
    }

    pub fn last_utc(&self) -> Option<DateTime<Utc>> {
        self.last.map(instant_to_utc)
    }

    pub fn summary(&self) -> QueueSummary {
        QueueSummary {
            pending: self.count,
            next_due: self.first_utc(),
            last_due: self.last_utc(),
        }
    }
}

/// Serializable form of [`QueueInfo`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub pending: usize,
    pub next_due: Option<DateTime<Utc>>,
    pub last_due: Option<DateTime<Utc>>,
}

fn instant_to_utc(at: Instant) -> DateTime<Utc> {
    let now = Instant::now();
    let wall = Utc::now();
    if at >= now {
        wall + chrono::Duration::from_std(at - now).unwrap_or_else(|_| chrono::Duration::zero())
    } else {
        wall - chrono::Duration::from_std(now - at).unwrap_or_else(|_| chrono::Duration::zero())
    }
}

fn utc_to_instant(at: DateTime<Utc>) -> Instant {
    let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    deadline_after(delay)
}

/// Latest deadline a job can be given; larger delays are clamped to it.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 86_400);

fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay.min(FAR_FUTURE))
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

struct State {
    /// Keyed by deadline, then insertion sequence to keep keys unique.
    jobs: BTreeMap<(Instant, u64), Job>,
    next_seq: u64,
    stop_requested: bool,
    stop_when_empty: bool,
    servicing: usize,
}

impl State {
    fn should_exit(&self) -> bool {
        self.stop_requested || (self.stop_when_empty && self.jobs.is_empty())
    }
}

/// A single timeline of deferred jobs, serviced by one or more threads
/// running [`service_queue`](Self::service_queue).
///
/// Jobs never run before their deadline and run with the lock released, so
/// a job may schedule further jobs.
pub struct Scheduler {
    state: Mutex<State>,
    changed: Condvar,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                jobs: BTreeMap::new(),
                next_seq: 0,
                stop_requested: false,
                stop_when_empty: false,
                servicing: 0,
            }),
            changed: Condvar::new(),
        }
    }

    /// Run `f` at `at`.
    pub fn schedule<F>(&self, f: F, at: Instant)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.jobs.insert((at, seq), Box::new(f));
        telemetry::record_scheduler_backlog(state.jobs.len());
        drop(state);

        self.changed.notify_one();
    }

    pub fn schedule_from_now<F>(&self, f: F, delay: Duration)
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule(f, deadline_after(delay));
    }

    /// Run `f` at a wall-clock time. Times in the past run as soon as possible.
    pub fn schedule_at_utc<F>(&self, f: F, at: DateTime<Utc>)
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule(f, utc_to_instant(at));
    }

    /// Run `f` every `interval`, first after one interval.
    ///
    /// Each run schedules the next one once `f` returns. The chain ends when
    /// the returned handle is cancelled or the scheduler is stopping;
    /// dropping the handle does not cancel.
    pub fn schedule_every<F>(self: &Arc<Self>, f: F, interval: Duration) -> RepeatHandle
    where
        F: FnMut() + Send + 'static,
    {
        let token = CancellationToken::new();
        self.schedule_repeat(Box::new(f), interval, token.clone());
        RepeatHandle::new(token)
    }

    fn schedule_repeat(
        self: &Arc<Self>,
        mut f: Box<dyn FnMut() + Send>,
        interval: Duration,
        token: CancellationToken,
    ) {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.schedule_from_now(
            move || {
                if token.is_cancelled() {
                    return;
                }
                f();
                let Some(scheduler) = weak.upgrade() else {
                    return;
                };
                if token.is_cancelled() || scheduler.is_stopping() {
                    return;
                }
                scheduler.schedule_repeat(f, interval, token);
            },
            interval,
        );
    }

    /// Servicing thread body. Returns once [`stop`](Self::stop) is observed.
    pub fn service_queue(&self) {
        let _registration = ServicingRegistration::new(self);
        let mut state = self.state.lock();

        loop {
            if state.should_exit() {
                break;
            }
            let Some(&(due, _)) = state.jobs.keys().next() else {
                self.changed.wait(&mut state);
                continue;
            };
            if Instant::now() < due {
                // A newly scheduled earlier job or a stop wakes us early.
                self.changed.wait_until(&mut state, due);
                continue;
            }
            let Some((_, job)) = state.jobs.pop_first() else {
                continue;
            };
            telemetry::record_scheduler_backlog(state.jobs.len());
            MutexGuard::unlocked(&mut state, || Self::run_job(job));
        }
    }

    fn run_job(job: Job) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            error!(
                panic = %telemetry::panic_message(&*payload),
                "scheduled job panicked"
            );
            telemetry::record_task_panic("scheduler");
        }
    }

    /// Tell servicing threads to exit.
    ///
    /// With `drain`, they first run every pending job as it comes due;
    /// without it, pending jobs are abandoned.
    pub fn stop(&self, drain: bool) {
        {
            let mut state = self.state.lock();
            if drain {
                state.stop_when_empty = true;
            } else {
                state.stop_requested = true;
            }
            debug!(drain, pending = state.jobs.len(), "stopping scheduler");
        }
        self.changed.notify_all();
    }

    pub fn is_stopping(&self) -> bool {
        let state = self.state.lock();
        state.stop_requested || state.stop_when_empty
    }

    pub fn queue_info(&self) -> QueueInfo {
        let state = self.state.lock();
        QueueInfo {
            count: state.jobs.len(),
            first: state.jobs.keys().next().map(|&(at, _)| at),
            last: state.jobs.keys().next_back().map(|&(at, _)| at),
        }
    }

    pub fn pending(&self) -> usize {
        self.state.lock().jobs.len()
    }

    /// Threads currently inside [`service_queue`](Self::service_queue).
    pub fn servicing_threads(&self) -> usize {
        self.state.lock().servicing
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        debug_assert_eq!(state.servicing, 0, "scheduler dropped while being serviced");
        if !state.jobs.is_empty() {
            debug!(abandoned = state.jobs.len(), "dropping scheduler with pending jobs");
        }
    }
}

struct ServicingRegistration<'a> {
    scheduler: &'a Scheduler,
}

impl<'a> ServicingRegistration<'a> {
    fn new(scheduler: &'a Scheduler) -> Self {
        scheduler.state.lock().servicing += 1;
        Self { scheduler }
    }
}

impl Drop for ServicingRegistration<'_> {
    fn drop(&mut self) {
        self.scheduler.state.lock().servicing -= 1;
    }
}
