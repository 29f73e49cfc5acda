//! # Threading Module
//!
//! Task-management utilities for the orchestration layer: a handle
//! collection with cancellation, and a capped concurrent batch runner.
//!
//! ## Overview
//!
//! The broker spawns long-lived tasks (server accept loop, refill cycle)
//! into a `TaskManager` so `stop()` can cancel and join them within the
//! cancellation window. Bounded fan-out over finite work (providers,
//! candidate checks) goes through `run_concurrent_batch`, which wraps
//! `buffer_unordered`.

use futures::{StreamExt, stream};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Manages a collection of task handles for concurrent execution.
#[derive(Default)]
pub struct TaskManager {
    tasks: Vec<JoinHandle<()>>,
}

impl TaskManager {
    /// Creates a new task manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a task and adds it to the managed set.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(tokio::spawn(future));
    }

    /// Waits for every managed task to finish.
    pub async fn join_all(&mut self) {
        while let Some(task) = self.tasks.pop() {
            let _ = task.await;
        }
    }

    /// Waits up to `window` for the managed tasks; anything still running
    /// afterwards is aborted and detached.
    pub async fn join_within(&mut self, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;
        while let Some(mut task) = self.tasks.pop() {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                task.abort();
                continue;
            }
            if tokio::time::timeout(deadline - now, &mut task).await.is_err() {
                task.abort();
            }
        }
    }

    /// Aborts every managed task immediately.
    pub fn cancel_all(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    /// Drops handles of tasks that already finished so long-running
    /// accept loops don't accumulate them.
    pub fn reap(&mut self) {
        self.tasks.retain(|task| !task.is_finished());
    }

    /// Number of managed tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True when no tasks are managed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Runs a batch of jobs with bounded parallelism, collecting results in
/// completion order.
pub async fn run_concurrent_batch<T, R, F, Fut>(
    items: Vec<T>,
    concurrency: usize,
    job_fn: F,
) -> Vec<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = R> + Send,
{
    stream::iter(items)
        .map(|item| {
            let job = job_fn.clone();
            async move { job(item).await }
        })
        .buffer_unordered(concurrency.max(1))
        .collect::<Vec<_>>()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn batch_respects_the_concurrency_cap() {
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let items: Vec<usize> = (0..20).collect();
        let (live_ref, peak_ref) = (Arc::clone(&live), Arc::clone(&peak));
        let results = run_concurrent_batch(items, 3, move |n| {
            let live = Arc::clone(&live_ref);
            let peak = Arc::clone(&peak_ref);
            async move {
                let current = live.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                live.fetch_sub(1, Ordering::SeqCst);
                n * 2
            }
        })
        .await;

        assert_eq!(results.len(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn join_within_aborts_stragglers() {
        let mut manager = TaskManager::new();
        manager.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        manager.spawn(async {});

        let started = std::time::Instant::now();
        manager.join_within(Duration::from_millis(50)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn cancel_all_is_idempotent() {
        let mut manager = TaskManager::new();
        manager.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        manager.cancel_all();
        manager.cancel_all();
        assert!(manager.is_empty());
    }
}
