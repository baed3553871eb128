//! Single pending reconnect task

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Holds at most one delayed reconnect. Scheduling a new one aborts the
/// previous task.
#[derive(Debug, Default)]
pub struct ReconnectScheduler {
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl ReconnectScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`. Must be called inside a tokio runtime.
    pub fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        let previous = self.pending.lock().replace(handle);
        if let Some(previous) = previous {
            if !previous.is_finished() {
                debug!("replacing pending reconnect");
            }
            previous.abort();
        }
    }

    /// Abort the pending reconnect, if any. Returns true if one was waiting.
    pub fn cancel(&self) -> bool {
        match self.pending.lock().take() {
            Some(handle) => {
                let waiting = !handle.is_finished();
                handle.abort();
                waiting
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Drop for ReconnectScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_new_schedule_replaces_old() {
        let scheduler = ReconnectScheduler::new();
        let runs = Arc::new(AtomicU32::new(0));

        let first = runs.clone();
        scheduler.schedule(Duration::from_secs(5), async move {
            first.fetch_add(1, Ordering::SeqCst);
        });
        let second = runs.clone();
        scheduler.schedule(Duration::from_secs(10), async move {
            second.fetch_add(10, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(scheduler.is_pending());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 10);
        assert!(!scheduler.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let scheduler = ReconnectScheduler::new();
        let runs = Arc::new(AtomicU32::new(0));
        let counter = runs.clone();
        scheduler.schedule(Duration::from_secs(1), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(scheduler.cancel());
        assert!(!scheduler.cancel());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
