//! Extended-lifetime tracking.
//!
//! The host may tear the worker down as soon as a handler returns. Anything
//! that has to finish afterwards (a background cache refresh, for instance)
//! is spawned through [`ExtendableEvent::wait_until`], and the host awaits
//! [`ExtendableEvent::settled`] before considering the event finished.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::warn;

/// Collects work that must complete before the worker may be suspended.
#[derive(Debug, Clone, Default)]
pub struct ExtendableEvent {
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl ExtendableEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `work` and keep the event alive until it completes.
    ///
    /// Handles of work that already finished are dropped here, so an event
    /// that is reused without ever settling stays bounded by its live work.
    pub fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(work);
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Number of handles currently held, finished or not.
    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of tracked tasks that have not finished yet.
    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Await every tracked task, including tasks registered while waiting.
    /// Returns how many tasks were awaited; work pruned after finishing on
    /// its own is not counted.
    pub async fn settled(&self) -> usize {
        let mut awaited = 0;
        loop {
            let batch =
                std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));
            if batch.is_empty() {
                return awaited;
            }
            for handle in batch {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Extended task did not complete");
                }
                awaited += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_settled_waits_for_all_work() {
        let event = ExtendableEvent::new();
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let done = done.clone();
            event.wait_until(async move {
                tokio::task::yield_now().await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(event.settled().await, 3);
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(event.pending(), 0);
    }

    #[tokio::test]
    async fn test_pending_until_released() {
        let event = ExtendableEvent::new();
        let (tx, rx) = oneshot::channel::<()>();
        event.wait_until(async move {
            let _ = rx.await;
        });

        assert_eq!(event.pending(), 1);
        tx.send(()).unwrap();
        assert_eq!(event.settled().await, 1);
    }

    #[tokio::test]
    async fn test_work_registered_during_settle() {
        let event = ExtendableEvent::new();
        let inner = event.clone();
        let done = Arc::new(AtomicUsize::new(0));
        let done_inner = done.clone();

        event.wait_until(async move {
            inner.wait_until(async move {
                done_inner.fetch_add(1, Ordering::SeqCst);
            });
        });

        assert_eq!(event.settled().await, 2);
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_finished_work_is_pruned_without_settling() {
        let event = ExtendableEvent::new();

        for _ in 0..50 {
            event.wait_until(async {});
            while event.pending() > 0 {
                tokio::task::yield_now().await;
            }
        }
        assert_eq!(event.tracked(), 1);

        let (tx, rx) = oneshot::channel::<()>();
        event.wait_until(async move {
            let _ = rx.await;
        });
        assert_eq!(event.tracked(), 1);
        tx.send(()).unwrap();
        assert_eq!(event.settled().await, 1);
    }

    #[tokio::test]
    async fn test_panicking_work_is_contained() {
        let event = ExtendableEvent::new();
        event.wait_until(async { panic!("boom") });
        assert_eq!(event.settled().await, 1);
    }
}
