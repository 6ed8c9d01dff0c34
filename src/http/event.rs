//! The I/O thread and events delivered to it.
//!
//! The I/O thread owns a single-threaded tokio runtime. Other threads hand
//! it work by posting closures through an [`EventLoopHandle`]; replies to
//! HTTP requests travel this way so that they are only ever transmitted on
//! the I/O thread.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::{Builder, Handle};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::telemetry;

/// Default time given to in-flight events when the loop stops.
pub const DEFAULT_EXIT_GRACE: Duration = Duration::from_millis(2000);

#[derive(Debug, Error)]
pub enum EventLoopError {
    #[error("Failed to build event loop runtime: {0}")]
    RuntimeBuild(#[source] std::io::Error),
    #[error("Failed to spawn event loop thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),
    #[error("Event loop thread exited during startup")]
    StartupAborted,
    #[error("Event loop is closed")]
    Closed,
    #[error("Event loop thread panicked")]
    ThreadPanicked,
}

/// Events posted to the loop that have not fired or been dropped yet.
struct PendingEvents {
    count: AtomicUsize,
    drained: Notify,
}

struct PendingGuard {
    pending: Arc<PendingEvents>,
}

impl PendingGuard {
    fn new(pending: &Arc<PendingEvents>) -> Self {
        pending.count.fetch_add(1, Ordering::SeqCst);
        Self {
            pending: Arc::clone(pending),
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.count.fetch_sub(1, Ordering::SeqCst);
        self.pending.drained.notify_one();
    }
}

struct Shared {
    runtime: Handle,
    io_thread: ThreadId,
    pending: Arc<PendingEvents>,
    closed: AtomicBool,
}

/// Cloneable handle used to post work onto the I/O thread.
#[derive(Clone)]
pub struct EventLoopHandle {
    shared: Arc<Shared>,
}

impl EventLoopHandle {
    /// Run `f` on the I/O thread, after `delay` if given.
    pub fn post<F>(&self, delay: Option<Duration>, f: F) -> Result<(), EventLoopError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn_event(delay, None, f)
    }

    /// Like [`post`](Self::post), but `f` is skipped if `token` is
    /// cancelled before it fires.
    pub fn post_cancellable<F>(
        &self,
        delay: Option<Duration>,
        token: CancellationToken,
        f: F,
    ) -> Result<(), EventLoopError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn_event(delay, Some(token), f)
    }

    fn spawn_event<F>(
        &self,
        delay: Option<Duration>,
        token: Option<CancellationToken>,
        f: F,
    ) -> Result<(), EventLoopError>
    where
        F: FnOnce() + Send + 'static,
    {
        // Count the event before checking `closed` so a concurrent stop
        // either refuses it here or waits for it in `drain`.
        let guard = PendingGuard::new(&self.shared.pending);
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(EventLoopError::Closed);
        }

        self.shared.runtime.spawn(async move {
            let _guard = guard;
            match (delay.filter(|d| !d.is_zero()), token) {
                (Some(delay), Some(token)) => {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                (Some(delay), None) => tokio::time::sleep(delay).await,
                (None, Some(token)) if token.is_cancelled() => return,
                (None, _) => {}
            }
            fire(f);
        });
        Ok(())
    }

    /// True when called from the I/O thread itself.
    pub fn is_io_thread(&self) -> bool {
        thread::current().id() == self.shared.io_thread
    }

    pub fn is_running(&self) -> bool {
        !self.shared.closed.load(Ordering::SeqCst)
    }

    /// Events posted but not yet fired.
    pub fn pending_events(&self) -> usize {
        self.shared.pending.count.load(Ordering::SeqCst)
    }
}

fn fire<F: FnOnce()>(f: F) {
    telemetry::record_event_fired();
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        error!(
            panic = %telemetry::panic_message(&*payload),
            "event loop callback panicked"
        );
        telemetry::record_task_panic("event_loop");
    }
}

/// The I/O thread. Stopped explicitly or on drop.
pub struct EventLoop {
    handle: EventLoopHandle,
    shutdown: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl EventLoop {
    /// Start the I/O thread named `name`.
    ///
    /// On stop, events already posted get up to `exit_grace` to fire
    /// before the loop is broken and the rest are dropped.
    pub fn spawn(name: impl Into<String>, exit_grace: Duration) -> Result<Self, EventLoopError> {
        let shutdown = CancellationToken::new();
        let pending = Arc::new(PendingEvents {
            count: AtomicUsize::new(0),
            drained: Notify::new(),
        });
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let thread_shutdown = shutdown.clone();
        let thread_pending = Arc::clone(&pending);
        let thread = thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                let runtime = match Builder::new_current_thread().enable_time().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok((runtime.handle().clone(), thread::current().id())));

                info!("Entering http event loop");
                runtime.block_on(async {
                    thread_shutdown.cancelled().await;
                    drain(&thread_pending, exit_grace).await;
                });
                // Dropping the runtime discards whatever is still queued.
                drop(runtime);
                info!("Exited http event loop");
            })
            .map_err(EventLoopError::ThreadSpawn)?;

        let (runtime, io_thread) = match ready_rx.recv() {
            Ok(Ok(ready)) => ready,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(EventLoopError::RuntimeBuild(e));
            }
            Err(_) => {
                let _ = thread.join();
                return Err(EventLoopError::StartupAborted);
            }
        };

        Ok(Self {
            handle: EventLoopHandle {
                shared: Arc::new(Shared {
                    runtime,
                    io_thread,
                    pending,
                    closed: AtomicBool::new(false),
                }),
            },
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> EventLoopHandle {
        self.handle.clone()
    }

    /// Refuse new events, let pending ones drain, and join the thread.
    pub fn stop(&mut self) -> Result<(), EventLoopError> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        debug!("Waiting for HTTP event thread to exit");
        self.handle.shared.closed.store(true, Ordering::SeqCst);
        self.shutdown.cancel();
        thread.join().map_err(|_| EventLoopError::ThreadPanicked)
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!(error = %e, "event loop did not stop cleanly");
        }
    }
}

async fn drain(pending: &PendingEvents, grace: Duration) {
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        if pending.count.load(Ordering::SeqCst) == 0 {
            return;
        }
        tokio::select! {
            _ = pending.drained.notified() => {}
            _ = tokio::time::sleep_until(deadline) => {
                let remaining = pending.count.load(Ordering::SeqCst);
                if remaining > 0 {
                    warn!(remaining, "HTTP event loop did not exit within allotted time, sending loopbreak");
                }
                return;
            }
        }
    }
}

/// A reusable event: every trigger posts one invocation of the callback.
pub struct Event {
    handle: EventLoopHandle,
    callback: Arc<dyn Fn() + Send + Sync>,
}

impl Event {
    pub fn new<F>(handle: EventLoopHandle, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            handle,
            callback: Arc::new(callback),
        }
    }

    pub fn trigger(&self, delay: Option<Duration>) -> Result<(), EventLoopError> {
        let callback = Arc::clone(&self.callback);
        self.handle.post(delay, move || callback())
    }
}

/// An event that fires once. Triggering consumes it; the loop drops the
/// callback after running it.
pub struct OneShotEvent {
    handle: EventLoopHandle,
    callback: Box<dyn FnOnce() + Send>,
}

impl OneShotEvent {
    pub fn new<F>(handle: EventLoopHandle, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            handle,
            callback: Box::new(callback),
        }
    }

    pub fn trigger(self, delay: Option<Duration>) -> Result<(), EventLoopError> {
        let callback = self.callback;
        self.handle.post(delay, callback)
    }
}
