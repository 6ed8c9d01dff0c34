//! The node: owns every component and tears them down in order.
//!
//! Shutdown order matters. Workers may still be posting replies to the I/O
//! thread and scheduled jobs may still enqueue work, so the sequence is:
//! reject new requests, interrupt and join the workers, wait for in-flight
//! replies, stop the scheduler, and stop the I/O thread last.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::{ConfigError, NodeConfig};
use crate::health::{ComponentSnapshot, HealthChecker, HealthReport};
use crate::http::{Dispatcher, HttpRequest, HttpServer, HttpWorkItem, ServerError};
use crate::scheduler::{Scheduler, SchedulerError, ServiceThreads};
use crate::shutdown::{ShutdownCoordinator, ShutdownResult, ShutdownState};
use crate::workqueue::WorkQueue;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Cloneable view used to build health reports from any thread.
#[derive(Clone)]
pub struct HealthProbe {
    checker: Arc<HealthChecker>,
    queue: Arc<WorkQueue<HttpWorkItem>>,
    scheduler: Arc<Scheduler>,
    shutdown: ShutdownCoordinator,
    configured_workers: usize,
}

impl HealthProbe {
    pub fn report(&self) -> HealthReport {
        let components = ComponentSnapshot {
            queue_depth: self.queue.depth(),
            queue_capacity: self.queue.max_depth(),
            live_workers: self.queue.worker_count(),
            configured_workers: self.configured_workers,
            in_flight: self.shutdown.in_flight_count(),
            servicing_threads: self.scheduler.servicing_threads(),
        };
        self.checker.report(
            self.shutdown.state(),
            components,
            self.scheduler.queue_info().summary(),
        )
    }
}

pub struct Node {
    config: NodeConfig,
    shutdown: ShutdownCoordinator,
    http: HttpServer,
    scheduler: Arc<Scheduler>,
    service_threads: Option<ServiceThreads>,
    health: HealthProbe,
}

impl Node {
    /// Validate `config` and start the scheduler and the HTTP server.
    pub fn start(config: NodeConfig) -> Result<Self, NodeError> {
        config.validate()?;

        let shutdown = ShutdownCoordinator::new();
        let scheduler = Arc::new(Scheduler::new());
        let service_threads = ServiceThreads::spawn(
            &scheduler,
            &config.scheduler,
            &config.http.thread_name_prefix,
        )?;

        let mut http = HttpServer::init(config.http.clone(), shutdown.clone())?;
        http.start()?;

        let health = HealthProbe {
            checker: Arc::new(HealthChecker::new()),
            queue: Arc::clone(http.queue()),
            scheduler: Arc::clone(&scheduler),
            shutdown: shutdown.clone(),
            configured_workers: http.config().worker_threads,
        };

        info!("Node started");
        Ok(Self {
            config,
            shutdown,
            http,
            scheduler,
            service_threads: Some(service_threads),
            health,
        })
    }

    /// Entry point for the network layer.
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.http.dispatcher()
    }

    pub fn register_handler<F>(&self, prefix: impl Into<String>, exact_match: bool, handler: F)
    where
        F: Fn(HttpRequest, &str) + Send + Sync + 'static,
    {
        self.http.register_handler(prefix, exact_match, handler);
    }

    pub fn unregister_handler(&self, prefix: &str, exact_match: bool) -> bool {
        self.http.unregister_handler(prefix, exact_match)
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn http(&self) -> &HttpServer {
        &self.http
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn state(&self) -> ShutdownState {
        self.shutdown.state()
    }

    pub fn health_probe(&self) -> HealthProbe {
        self.health.clone()
    }

    pub fn health_report(&self) -> HealthReport {
        self.health.report()
    }

    /// Run the ordered shutdown. Returns whether every in-flight reply was
    /// delivered before the timeout.
    pub fn shutdown(mut self) -> Result<ShutdownResult, NodeError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<ShutdownResult, NodeError> {
        info!("Shutdown: in progress");
        self.http.interrupt();
        self.http.stop_workers();

        let drained = self.shutdown.wait_for_drain(self.config.shutdown_timeout());
        if let ShutdownResult::Timeout { remaining } = drained {
            warn!(remaining, "Shutdown: replies still in flight after timeout");
        }

        if let Some(mut threads) = self.service_threads.take() {
            threads.stop(self.config.scheduler.drain_on_stop);
        }

        let stopped = self.http.stop();
        self.shutdown.finish();
        stopped?;
        info!("Shutdown: done");
        Ok(drained)
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if self.shutdown.state() != ShutdownState::Stopped {
            if let Err(e) = self.stop() {
                tracing::error!(error = %e, "node did not shut down cleanly");
            }
        }
    }
}
