use crate::error::ApiError;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// How a session ended, as seen by callers waiting on its gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed(ApiError),
    Cancelled,
    /// The session was reset for reuse while this gate was still open.
    Reset,
}

/// Single-release, multi-wait gate.
///
/// The first `release` wins; later calls are ignored. Any number of tasks may
/// wait, before or after the release.
#[derive(Debug, Default)]
pub struct CompletionGate {
    outcome: Mutex<Option<Outcome>>,
    notify: Notify,
}

impl CompletionGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this call released the gate.
    pub fn release(&self, outcome: Outcome) -> bool {
        {
            let mut slot = self.outcome.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
        }
        self.notify.notify_waiters();
        true
    }

    #[must_use]
    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome.lock().clone()
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.outcome.lock().is_some()
    }

    pub async fn wait(&self) -> Outcome {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(outcome) = self.outcome() {
                return outcome;
            }
            notified.await;
        }
    }

    /// Wait at most `timeout`; `None` if the gate was not released in time.
    pub async fn wait_timeout(&self, timeout: Duration) -> Option<Outcome> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }
}
