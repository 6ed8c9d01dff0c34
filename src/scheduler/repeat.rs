use tokio_util::sync::CancellationToken;

/// Controls a chain started by [`Scheduler::schedule_every`](super::Scheduler::schedule_every).
///
/// Cancelling stops the next run and everything after it; a run already in
/// progress finishes. Dropping the handle leaves the chain running.
#[derive(Debug, Clone)]
pub struct RepeatHandle {
    token: CancellationToken,
}

impl RepeatHandle {
    pub(super) fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
