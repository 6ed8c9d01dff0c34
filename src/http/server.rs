//! HTTP server lifecycle.
//!
//! `init` builds the allow-list, work queue, I/O thread and dispatcher;
//! `start` launches the workers. Shutdown is split so the node can stop
//! the scheduler between the workers and the I/O thread:
//! `interrupt` → `stop_workers` → (scheduler) → `stop`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::acl::{AclError, AllowList};
use super::dispatch::{Dispatcher, HttpWorkItem};
use super::event::{EventLoop, EventLoopError, EventLoopHandle};
use super::request::HttpRequest;
use super::router::HandlerRegistry;
use super::timers::DeadlineTimers;
use crate::shutdown::ShutdownCoordinator;
use crate::workqueue::{WorkQueue, WorkerPool, WorkerPoolConfig, WorkerPoolError};

/// HTTP section of the node configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Pending requests accepted before replying "queue depth exceeded".
    pub work_queue_depth: usize,
    pub worker_threads: usize,
    /// Per-request timeout, enforced by the network layer.
    pub server_timeout_secs: u64,
    pub max_headers_size: usize,
    pub max_body_size: usize,
    /// Extra subnets allowed to connect. Loopback is always allowed.
    pub allow_ip: Vec<String>,
    pub event_loop_grace_ms: u64,
    pub thread_name_prefix: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            work_queue_depth: 16,
            worker_threads: 4,
            server_timeout_secs: 30,
            max_headers_size: 8192,
            max_body_size: 0x0200_0000,
            allow_ip: Vec::new(),
            event_loop_grace_ms: 2000,
            thread_name_prefix: "node".to_string(),
        }
    }
}

impl HttpConfig {
    pub fn server_timeout(&self) -> Duration {
        Duration::from_secs(self.server_timeout_secs)
    }

    pub fn event_loop_grace(&self) -> Duration {
        Duration::from_millis(self.event_loop_grace_ms)
    }

    /// Raise values that must be positive to 1.
    pub fn apply_floors(&mut self) {
        self.work_queue_depth = self.work_queue_depth.max(1);
        self.worker_threads = self.worker_threads.max(1);
        self.server_timeout_secs = self.server_timeout_secs.max(1);
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Acl(#[from] AclError),
    #[error(transparent)]
    EventLoop(#[from] EventLoopError),
    #[error(transparent)]
    WorkerPool(#[from] WorkerPoolError),
    #[error("HTTP server already started")]
    AlreadyStarted,
}

pub struct HttpServer {
    config: HttpConfig,
    registry: Arc<HandlerRegistry>,
    queue: Arc<WorkQueue<HttpWorkItem>>,
    dispatcher: Arc<Dispatcher>,
    timers: DeadlineTimers,
    event_loop: EventLoop,
    workers: Option<WorkerPool>,
    shutdown: ShutdownCoordinator,
    started: bool,
}

impl HttpServer {
    pub fn init(config: HttpConfig, shutdown: ShutdownCoordinator) -> Result<Self, ServerError> {
        let mut config = config;
        config.apply_floors();

        let allow_list = AllowList::from_specs(&config.allow_ip)?;
        info!(subnets = %allow_list.describe(), "Allowing HTTP connections");

        let queue = Arc::new(WorkQueue::new(config.work_queue_depth));
        info!(depth = queue.max_depth(), "HTTP: creating work queue");

        let event_loop = EventLoop::spawn(
            format!("{}-http", config.thread_name_prefix),
            config.event_loop_grace(),
        )?;
        let registry = Arc::new(HandlerRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&queue),
            allow_list,
            event_loop.handle(),
            shutdown.clone(),
        ));
        let timers = DeadlineTimers::new(event_loop.handle());

        debug!("Initialized HTTP server");
        Ok(Self {
            config,
            registry,
            queue,
            dispatcher,
            timers,
            event_loop,
            workers: None,
            shutdown,
            started: false,
        })
    }

    /// Spawn the worker threads.
    pub fn start(&mut self) -> Result<(), ServerError> {
        if self.started {
            return Err(ServerError::AlreadyStarted);
        }
        info!(threads = self.config.worker_threads, "Starting HTTP server");
        let pool_config = WorkerPoolConfig {
            threads: self.config.worker_threads,
            thread_name_prefix: format!("{}-httpworker", self.config.thread_name_prefix),
            stack_size: 0,
        };
        self.workers = Some(WorkerPool::spawn(&self.queue, &pool_config)?);
        self.started = true;
        Ok(())
    }

    /// Reject new requests with 503 and tell the workers to stop.
    pub fn interrupt(&self) {
        info!("Interrupting HTTP server");
        self.shutdown.begin_drain();
        self.queue.interrupt();
    }

    /// Wait for the workers to exit and drop whatever is still queued.
    ///
    /// Each dropped request replies `500 Unhandled request` through the
    /// I/O thread, which is still running at this point.
    pub fn stop_workers(&mut self) {
        if self.queue.is_running() {
            self.interrupt();
        }
        let Some(workers) = self.workers.take() else {
            self.queue.clear();
            return;
        };
        debug!("Waiting for HTTP worker threads to exit");
        self.queue.wait_exit();
        workers.join();
        self.queue.clear();
    }

    /// Stop everything, the I/O thread last.
    pub fn stop(&mut self) -> Result<(), ServerError> {
        info!("Stopping HTTP server");
        self.stop_workers();
        self.timers.clear();
        self.event_loop.stop()?;
        info!("Stopped HTTP server");
        Ok(())
    }

    /// Entry point for the network layer.
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn register_handler<F>(&self, prefix: impl Into<String>, exact_match: bool, handler: F)
    where
        F: Fn(HttpRequest, &str) + Send + Sync + 'static,
    {
        self.registry.register(prefix, exact_match, handler);
    }

    pub fn unregister_handler(&self, prefix: &str, exact_match: bool) -> bool {
        self.registry.unregister(prefix, exact_match)
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<WorkQueue<HttpWorkItem>> {
        &self.queue
    }

    pub fn timers(&self) -> &DeadlineTimers {
        &self.timers
    }

    pub fn event_loop(&self) -> EventLoopHandle {
        self.event_loop.handle()
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        if self.event_loop.handle().is_running() {
            if let Err(e) = self.stop() {
                tracing::error!(error = %e, "HTTP server did not stop cleanly");
            }
        }
    }
}
