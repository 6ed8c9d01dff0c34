//! node-dispatch
//!
//! Request-dispatch and deferred-task backbone of a long-running network
//! node.
//!
//! # Threads
//!
//! - **I/O thread**: runs the event loop; the only thread that transmits
//!   replies ([`http::EventLoop`]).
//! - **Worker threads**: drain the bounded work queue and run request
//!   handlers ([`workqueue::WorkQueue`]).
//! - **Servicing threads**: run scheduled jobs as they come due
//!   ([`scheduler::Scheduler`]).
//!
//! The network layer itself is external: it hands parsed requests to
//! [`http::Dispatcher::dispatch`] and receives replies through a
//! [`http::ReplySink`].

pub mod cli;
pub mod config;
pub mod health;
pub mod http;
pub mod node;
pub mod scheduler;
pub mod shutdown;
pub mod telemetry;
pub mod workqueue;

pub use config::NodeConfig;
pub use node::{HealthProbe, Node, NodeError};
