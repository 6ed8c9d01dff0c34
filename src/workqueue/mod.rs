//! Bounded work queue and the worker threads that drain it.
//!
//! The queue is the only hand-off point between the I/O thread and the
//! worker pool. Capacity is fixed at construction; producers are never
//! blocked, they are told the queue is full instead.

mod pool;
mod queue;

pub use pool::{WorkerPool, WorkerPoolConfig, WorkerPoolError};
pub use queue::{QueueFull, Task, WorkItem, WorkQueue};
