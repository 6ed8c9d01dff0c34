//! Blocking FIFO of work items with a depth limit.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::telemetry;

/// A unit of work executed exactly once by a worker thread.
pub trait WorkItem: Send + 'static {
    /// Short label used in logs and metrics.
    fn kind(&self) -> &'static str {
        "task"
    }

    fn run(self);
}

/// A boxed closure submitted as work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

impl WorkItem for Task {
    fn run(self) {
        self()
    }
}

/// Returned by [`WorkQueue::enqueue`] when the queue is at capacity.
///
/// The rejected item is handed back so the caller keeps ownership.
pub struct QueueFull<T>(pub T);

impl<T> QueueFull<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for QueueFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueueFull(..)")
    }
}

impl<T> fmt::Display for QueueFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "work queue depth exceeded")
    }
}

impl<T> std::error::Error for QueueFull<T> {}

struct State<T> {
    items: VecDeque<T>,
    running: bool,
    workers: usize,
}

/// Work queue shared by the I/O thread (producer) and the worker threads.
///
/// Dequeue order is FIFO. With more than one worker, completion order is
/// whatever the scheduler makes of it.
pub struct WorkQueue<T> {
    state: Mutex<State<T>>,
    /// Signalled when an item arrives or the queue is interrupted.
    available: Condvar,
    /// Signalled when a worker deregisters.
    exited: Condvar,
    max_depth: usize,
}

impl<T: WorkItem> WorkQueue<T> {
    /// Create a queue holding at most `max_depth` pending items (floor 1).
    pub fn new(max_depth: usize) -> Self {
        let max_depth = max_depth.max(1);
        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(max_depth),
                running: true,
                workers: 0,
            }),
            available: Condvar::new(),
            exited: Condvar::new(),
            max_depth,
        }
    }

    /// Append an item and wake one idle worker. Never blocks.
    ///
    /// Fails without touching the queue when it already holds `max_depth`
    /// items. Items enqueued after [`interrupt`](Self::interrupt) are
    /// accepted by the same rule but will not run.
    pub fn enqueue(&self, item: T) -> Result<(), QueueFull<T>> {
        let mut state = self.state.lock();
        if state.items.len() >= self.max_depth {
            return Err(QueueFull(item));
        }
        state.items.push_back(item);
        telemetry::record_queue_depth(state.items.len());
        drop(state);

        self.available.notify_one();
        Ok(())
    }

    /// Worker thread body: execute items until the queue is interrupted.
    ///
    /// Items run with the lock released so they may enqueue further work.
    /// A panicking item is logged and the worker carries on.
    pub fn run(&self) {
        let _registration = WorkerRegistration::new(self);

        loop {
            let item = {
                let mut state = self.state.lock();
                while state.running && state.items.is_empty() {
                    self.available.wait(&mut state);
                }
                if !state.running {
                    break;
                }
                let Some(item) = state.items.pop_front() else {
                    continue;
                };
                telemetry::record_queue_depth(state.items.len());
                item
            };
            Self::execute(item);
        }
    }

    fn execute(item: T) {
        let kind = item.kind();
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(move || item.run()));
        telemetry::record_work_item_duration(kind, started.elapsed());

        if let Err(payload) = outcome {
            tracing::error!(
                kind,
                panic = %telemetry::panic_message(&*payload),
                "work item panicked"
            );
            telemetry::record_task_panic("work_queue");
        }
    }

    /// Stop the workers. Running items finish; queued items stay queued.
    pub fn interrupt(&self) {
        self.state.lock().running = false;
        self.available.notify_all();
    }

    /// Block until every worker has left [`run`](Self::run).
    ///
    /// Only returns once workers have observed an [`interrupt`](Self::interrupt).
    pub fn wait_exit(&self) {
        let mut state = self.state.lock();
        while state.workers > 0 {
            self.exited.wait(&mut state);
        }
    }

    /// Drop all pending items without running them. Returns how many were dropped.
    ///
    /// Items are destroyed after the lock is released.
    pub fn clear(&self) -> usize {
        let discarded: Vec<T> = self.state.lock().items.drain(..).collect();
        let count = discarded.len();
        if count > 0 {
            tracing::debug!(discarded = count, "discarding unexecuted work items");
        }
        telemetry::record_queue_depth(0);
        drop(discarded);
        count
    }

    /// Current number of pending items. Advisory.
    pub fn depth(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Number of threads currently inside [`run`](Self::run).
    pub fn worker_count(&self) -> usize {
        self.state.lock().workers
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }
}

impl<T> Drop for WorkQueue<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        debug_assert_eq!(state.workers, 0, "work queue dropped with live workers");
        if !state.items.is_empty() {
            tracing::debug!(
                discarded = state.items.len(),
                "discarding unexecuted work items"
            );
        }
    }
}

/// Counts a thread as a live worker for as long as it is held.
struct WorkerRegistration<'a, T> {
    queue: &'a WorkQueue<T>,
}

impl<'a, T> WorkerRegistration<'a, T> {
    fn new(queue: &'a WorkQueue<T>) -> Self {
        queue.state.lock().workers += 1;
        Self { queue }
    }
}

impl<T> Drop for WorkerRegistration<'_, T> {
    fn drop(&mut self) {
        self.queue.state.lock().workers -= 1;
        self.queue.exited.notify_all();
    }
}
