//! Recurring-task scheduler for the wallet engine.
//!
//! Each registered task runs to completion before its own next run is
//! scheduled, so a slow pass never overlaps itself; different tasks run
//! independently. Initial delays are randomized within one interval so many
//! wallets started together do not synchronize their requests against
//! shared infrastructure.

use crate::engine::types::EngineError;

use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

struct ScheduledTask {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Drives named repeating tasks with jittered start delays and race-free
/// cancellation.
#[derive(Default)]
pub struct PollScheduler {
    tasks: Mutex<HashMap<String, ScheduledTask>>,
}

impl PollScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a repeating task under `name`.
    ///
    /// The first run starts after a random delay in `0..interval`; each
    /// subsequent run is scheduled one interval after the previous run
    /// completed. A failing run is logged and does not deregister the task.
    /// Re-scheduling an existing name replaces the previous registration.
    pub fn schedule<F, Fut>(&self, name: &str, interval: Duration, task: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), EngineError>> + Send + 'static,
    {
        let initial_delay = jittered_delay(interval);
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let task_name = name.to_string();

        let handle = tokio::spawn(async move {
            let mut delay = initial_delay;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel_rx.changed() => break,
                }
                if *cancel_rx.borrow() {
                    break;
                }
                if let Err(e) = task().await {
                    warn!(task = %task_name, "scheduled task failed: {}", e);
                }
                delay = interval;
            }
            debug!(task = %task_name, "scheduled task stopped");
        });

        let previous = self.tasks.lock().unwrap().insert(
            name.to_string(),
            ScheduledTask {
                cancel: cancel_tx,
                handle,
            },
        );
        if let Some(previous) = previous {
            let _ = previous.cancel.send(true);
        }
    }

    /// Cancel one task. After this returns no further invocation of the
    /// task can start; an in-flight invocation is allowed to finish first.
    pub async fn cancel(&self, name: &str) {
        let task = self.tasks.lock().unwrap().remove(name);
        if let Some(task) = task {
            let _ = task.cancel.send(true);
            let _ = task.handle.await;
        }
    }

    /// Cancel every registered task, waiting for in-flight runs to finish.
    pub async fn cancel_all(&self) {
        let tasks: Vec<ScheduledTask> = {
            let mut guard = self.tasks.lock().unwrap();
            guard.drain().map(|(_, task)| task).collect()
        };
        for task in tasks {
            let _ = task.cancel.send(true);
            let _ = task.handle.await;
        }
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        self.tasks.lock().unwrap().contains_key(name)
    }
}

fn jittered_delay(interval: Duration) -> Duration {
    let millis = interval.as_millis().max(1) as u64;
    Duration::from_millis(rand::rng().random_range(0..millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn runs_repeat_at_interval() {
        let scheduler = PollScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = runs.clone();
        scheduler.schedule("tick", Duration::from_secs(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_secs(55)).await;
        // Jittered start lands in [0, 10); at least four intervals elapsed.
        assert!(runs.load(Ordering::SeqCst) >= 4);
        scheduler.cancel_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn same_task_runs_never_overlap() {
        let scheduler = PollScheduler::new();
        let active = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let active_c = active.clone();
        let overlaps_c = overlaps.clone();
        scheduler.schedule("slow", Duration::from_millis(100), move || {
            let active = active_c.clone();
            let overlaps = overlaps_c.clone();
            async move {
                if active.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                // The run takes ten intervals.
                tokio::time::sleep(Duration::from_secs(1)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        scheduler.cancel_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failing_task_is_rescheduled() {
        let scheduler = PollScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = runs.clone();
        scheduler.schedule("flaky", Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::Persistence("simulated".to_string()))
            }
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(runs.load(Ordering::SeqCst) >= 3);
        assert!(scheduler.is_scheduled("flaky"));
        scheduler.cancel_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_future_runs() {
        let scheduler = PollScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = runs.clone();
        scheduler.schedule("doomed", Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_secs(3)).await;
        scheduler.cancel("doomed").await;
        assert!(!scheduler.is_scheduled("doomed"));

        let after_cancel = runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after_cancel);
    }
}
