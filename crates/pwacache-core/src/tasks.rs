//! Tracking for fire-and-forget work.
//!
//! Store writes after a network reply, background refreshes and forced
//! updates are spawned rather than awaited on the request path. Each one is
//! registered here so its failure is logged instead of lost, and so a host
//! can keep the process alive until they finish (`settle`).

use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct BackgroundTasks {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task`; an `Err` outcome is logged under `label` and dropped.
    pub fn spawn<F, E>(&self, label: &'static str, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            match task.await {
                Ok(()) => debug!(task = label, "Background task finished"),
                Err(e) => warn!(task = label, error = %e, "Background task failed"),
            }
        });

        let mut handles = self.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Wait for every task spawned so far, including tasks spawned by those
    /// tasks while waiting.
    pub async fn settle(&self) {
        loop {
            let batch = std::mem::take(&mut *self.lock());
            if batch.is_empty() {
                return;
            }
            for handle in batch {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Background task panicked or was cancelled");
                }
            }
        }
    }

    /// Tasks registered and not yet observed as finished.
    pub fn pending(&self) -> usize {
        self.lock().iter().filter(|h| !h.is_finished()).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_settle_waits_for_all_tasks() {
        let tasks = BackgroundTasks::new();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let counter = counter.clone();
            tasks.spawn("count", async move {
                tokio::task::yield_now().await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), String>(())
            });
        }
        tasks.settle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert_eq!(tasks.pending(), 0);
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let tasks = BackgroundTasks::new();
        tasks.spawn("fail", async { Err::<(), _>("boom") });
        tasks.settle().await;
    }

    #[tokio::test]
    async fn test_settle_follows_nested_spawns() {
        let tasks = BackgroundTasks::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let inner_tasks = tasks.clone();
        let inner_counter = counter.clone();
        tasks.spawn("outer", async move {
            inner_tasks.spawn("inner", async move {
                inner_counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), String>(())
            });
            Ok::<(), String>(())
        });
        tasks.settle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
