//! Named run-later timers on the I/O loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::event::{EventLoopError, EventLoopHandle};

struct Armed {
    generation: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct Registry {
    armed: HashMap<String, Armed>,
    next_generation: u64,
}

/// Timers keyed by name. Scheduling a name that is already armed replaces
/// the earlier timer. A timer's entry is removed when it fires.
pub struct DeadlineTimers {
    event_loop: EventLoopHandle,
    timers: Arc<Mutex<Registry>>,
}

impl DeadlineTimers {
    pub fn new(event_loop: EventLoopHandle) -> Self {
        Self {
            event_loop,
            timers: Arc::new(Mutex::new(Registry::default())),
        }
    }

    /// Run `f` on the I/O thread after `delay`.
    pub fn run_later<F>(&self, name: &str, f: F, delay: Duration) -> Result<(), EventLoopError>
    where
        F: FnOnce() + Send + 'static,
    {
        let token = CancellationToken::new();
        let mut timers = self.timers.lock();
        let generation = timers.next_generation;
        timers.next_generation += 1;
        let armed = Armed {
            generation,
            token: token.clone(),
        };
        if let Some(previous) = timers.armed.insert(name.to_string(), armed) {
            previous.token.cancel();
        }
        debug!(name, delay_ms = delay.as_millis() as u64, "arming deadline timer");

        let fired = token.clone();
        let registry = Arc::clone(&self.timers);
        let key = name.to_string();
        let result = self.event_loop.post_cancellable(Some(delay), token, move || {
            {
                let mut timers = registry.lock();
                if fired.is_cancelled() {
                    return;
                }
                if timers.armed.get(&key).is_some_and(|a| a.generation == generation) {
                    timers.armed.remove(&key);
                }
            }
            f();
        });
        if result.is_err() {
            timers.armed.remove(name);
        }
        result
    }

    /// Cancel the named timer. Returns false if none was armed.
    pub fn cancel(&self, name: &str) -> bool {
        match self.timers.lock().armed.remove(name) {
            Some(armed) => {
                armed.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every timer.
    pub fn clear(&self) {
        let timers: Vec<_> = self.timers.lock().armed.drain().collect();
        for (_, armed) in timers {
            armed.token.cancel();
        }
    }

    /// Timers armed and not yet fired or cancelled.
    pub fn len(&self) -> usize {
        self.timers.lock().armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for DeadlineTimers {
    fn drop(&mut self) {
        self.clear();
    }
}
