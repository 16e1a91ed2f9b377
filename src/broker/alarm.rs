use std::future::Future;
use std::time::Duration;

use tokio::task::AbortHandle;

/// Single-slot, cancellable one-shot timer.
///
/// The engine arms it when the first bid of a batch is admitted and cancels
/// it when the batch settles or the broker resets. Arming while armed
/// replaces the pending firing; later bids must NOT re-arm (the round
/// timeout runs from first admission only).
#[derive(Default)]
pub struct RoundAlarm {
    handle: Option<AbortHandle>,
}

impl RoundAlarm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    /// Schedules `on_fire` to run once after `delay`, replacing any
    /// pending firing.
    pub fn arm<F>(&mut self, delay: Duration, on_fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire.await;
        });
        self.handle = Some(task.abort_handle());
    }

    /// Disarms the pending firing. Idempotent; a no-op for an alarm whose
    /// task already ran.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
