//! Periodic sweep and the process-wide keep-polling flag.
//!
//! One background task per scheduler re-offers deferred jobs and reaps
//! finished workers, either every poll interval or as soon as a worker
//! reports that it is done. Clearing the keep-polling flag stops the task and
//! makes every wait loop return immediately; it is the only cancellation
//! channel the scheduler has.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct SweepTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct PollingService {
    keep_polling: AtomicBool,
    interval: Duration,
    wake: Arc<Notify>,
    swept: Arc<Notify>,
    task: Mutex<Option<SweepTask>>,
}

impl PollingService {
    pub fn new(interval: Duration) -> Self {
        Self {
            keep_polling: AtomicBool::new(true),
            interval,
            wake: Arc::new(Notify::new()),
            swept: Arc::new(Notify::new()),
            task: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn should_poll(&self) -> bool {
        self.keep_polling.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Clear the keep-polling flag and stop the sweep task. Waiters return
    /// on their next check.
    pub fn stop(&self) {
        self.keep_polling.store(false, Ordering::Release);
        if let Some(task) = self.task.lock().take() {
            task.token.cancel();
        }
        self.swept.notify_waiters();
    }

    /// Re-arm the flag after a [`PollingService::stop`].
    pub fn resume(&self) {
        self.keep_polling.store(true, Ordering::Release);
    }

    /// Spawn the sweep task unless one is already running. `sweep` returns
    /// false once its owner is gone. Must be called within a tokio runtime.
    pub(crate) fn start<F>(&self, mut sweep: F)
    where
        F: FnMut() -> bool + Send + 'static,
    {
        if !self.should_poll() {
            return;
        }
        let mut slot = self.task.lock();
        if slot.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            return;
        }

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let wake = self.wake.clone();
        let swept = self.swept.clone();
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                    _ = wake.notified() => {}
                }
                if !sweep() {
                    break;
                }
                swept.notify_waiters();
            }
            debug!("sweep task stopped");
        });

        *slot = Some(SweepTask { token, handle });
    }

    /// Ask for an early sweep (a worker just finished).
    pub(crate) fn wake(&self) {
        self.wake.notify_one();
    }

    /// Let waiters re-check state without waiting for the next sweep.
    pub(crate) fn notify_waiters(&self) {
        self.swept.notify_waiters();
    }

    /// Wait for the next sweep, at most one poll interval.
    pub async fn tick(&self) {
        let _ = tokio::time::timeout(self.interval, self.swept.notified()).await;
    }
}

impl Drop for PollingService {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.token.cancel();
        }
    }
}
