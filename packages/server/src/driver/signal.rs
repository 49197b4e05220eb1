use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

/// The scheduler's condition variable (spec.md §4.3 step 6:
/// "scheduler_state_changed"). Signalled by completion ingest, batch
/// close, batch cancel, instance state change, and config reload; the
/// scheduler loop waits on it or a short timer, whichever fires first.
#[derive(Clone)]
pub struct SchedulerSignal {
    notify: Arc<Notify>,
}

impl SchedulerSignal {
    pub fn new() -> Self {
        Self {
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn fire(&self) {
        self.notify.notify_waiters();
    }

    /// Waits for a signal or `timeout`, whichever comes first.
    pub async fn wait(&self, timeout: Duration) {
        let notified = self.notify.notified();
        tokio::select! {
            _ = notified => {}
            _ = tokio::time::sleep(timeout) => {}
        }
    }
}

impl Default for SchedulerSignal {
    fn default() -> Self {
        Self::new()
    }
}
