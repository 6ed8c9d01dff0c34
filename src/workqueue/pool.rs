//! Named worker threads draining a [`WorkQueue`].

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use thiserror::Error;

use super::queue::{WorkItem, WorkQueue};

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads (floor 1).
    pub threads: usize,
    /// Thread name prefix; threads are named `<prefix>-<n>`.
    pub thread_name_prefix: String,
    /// Thread stack size in bytes (0 = platform default).
    pub stack_size: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            thread_name_prefix: "node-httpworker".to_string(),
            stack_size: 0,
        }
    }
}

impl WorkerPoolConfig {
    /// Create config with specific thread count.
    pub fn with_threads(count: usize) -> Self {
        Self {
            threads: count.max(1),
            ..Default::default()
        }
    }
}

/// Errors for worker pool operations.
#[derive(Debug, Error)]
pub enum WorkerPoolError {
    #[error("Failed to spawn worker thread {name}: {source}")]
    ThreadSpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Handles of the threads running [`WorkQueue::run`].
///
/// The pool does not own the stop signal: interrupt the queue, then
/// [`join`](Self::join). Dropping the pool detaches the threads.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `config.threads` workers on `queue`.
    ///
    /// If a spawn fails the queue is interrupted and the threads already
    /// started are joined before the error is returned.
    pub fn spawn<T: WorkItem>(
        queue: &Arc<WorkQueue<T>>,
        config: &WorkerPoolConfig,
    ) -> Result<Self, WorkerPoolError> {
        let count = config.threads.max(1);
        let mut handles = Vec::with_capacity(count);

        for id in 0..count {
            let name = format!("{}-{}", config.thread_name_prefix, id);
            let mut builder = thread::Builder::new().name(name.clone());
            if config.stack_size > 0 {
                builder = builder.stack_size(config.stack_size);
            }

            let worker_queue = Arc::clone(queue);
            match builder.spawn(move || worker_queue.run()) {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    queue.interrupt();
                    Self { handles }.join();
                    return Err(WorkerPoolError::ThreadSpawnFailed { name, source });
                }
            }
        }

        tracing::info!(threads = count, "started HTTP worker threads");
        Ok(Self { handles })
    }

    /// Number of worker threads.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Join every worker. Returns how many threads ended in a panic.
    pub fn join(self) -> usize {
        let mut panicked = 0;
        for handle in self.handles {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            tracing::warn!(panicked, "worker threads terminated abnormally");
        }
        panicked
    }
}
