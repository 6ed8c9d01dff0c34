//! Named threads servicing a [`Scheduler`].

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::timeline::Scheduler;

/// Scheduler section of the node configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of servicing threads (floor 1).
    pub service_threads: usize,
    /// Run pending jobs before the servicing threads exit.
    pub drain_on_stop: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            service_threads: 1,
            drain_on_stop: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Failed to spawn scheduler thread {name}: {source}")]
    ThreadSpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// The threads running [`Scheduler::service_queue`].
pub struct ServiceThreads {
    scheduler: Arc<Scheduler>,
    handles: Vec<JoinHandle<()>>,
}

impl ServiceThreads {
    /// Spawn the servicing threads, named `<prefix>-scheduler` (or
    /// `<prefix>-scheduler-<n>` when there are several).
    pub fn spawn(
        scheduler: &Arc<Scheduler>,
        config: &SchedulerConfig,
        prefix: &str,
    ) -> Result<Self, SchedulerError> {
        let count = config.service_threads.max(1);
        let mut threads = Self {
            scheduler: Arc::clone(scheduler),
            handles: Vec::with_capacity(count),
        };

        for id in 0..count {
            let name = if count == 1 {
                format!("{prefix}-scheduler")
            } else {
                format!("{prefix}-scheduler-{id}")
            };
            let servicing = Arc::clone(scheduler);
            match thread::Builder::new()
                .name(name.clone())
                .spawn(move || servicing.service_queue())
            {
                Ok(handle) => threads.handles.push(handle),
                Err(source) => {
                    threads.stop(false);
                    return Err(SchedulerError::ThreadSpawnFailed { name, source });
                }
            }
        }

        info!(threads = count, "started scheduler threads");
        Ok(threads)
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop the scheduler and join every servicing thread. Returns how many
    /// threads ended in a panic.
    pub fn stop(&mut self, drain: bool) -> usize {
        self.scheduler.stop(drain);
        let mut panicked = 0;
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            warn!(panicked, "scheduler threads terminated abnormally");
        }
        panicked
    }
}

impl Drop for ServiceThreads {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.stop(false);
        }
    }
}
