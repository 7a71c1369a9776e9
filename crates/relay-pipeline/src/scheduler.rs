//! Deferred-task scheduling abstraction.
//!
//! The engine never calls `tokio::spawn` or `sleep` directly: every
//! fire-and-forget cycle and every delayed retry goes through a
//! [`RetryScheduler`]. Production uses [`TokioScheduler`]; tests drive
//! scheduled work deterministically with [`ManualScheduler`]. A durable
//! queue could replace either without touching the state machine.

use std::{future::Future, pin::Pin, sync::Mutex, time::Duration};

use tokio::time::sleep;

/// Boxed unit of deferred work.
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Schedules a task to run after a delay without blocking the caller.
pub trait RetryScheduler: Send + Sync {
    /// Queues `task` to run `delay` from now. Returns immediately.
    fn schedule(&self, delay: Duration, task: Task);
}

/// Production scheduler backed by the tokio timer.
///
/// A scheduled task survives only as long as the process: retries pending
/// at shutdown are lost.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl TokioScheduler {
    /// Creates a new tokio-backed scheduler.
    pub fn new() -> Self {
        Self
    }
}

impl RetryScheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) {
        tokio::spawn(async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            task.await;
        });
    }
}

/// Test scheduler that queues tasks for explicit draining.
///
/// Nothing runs until [`run_pending`](Self::run_pending) is called, which
/// makes "record is still PENDING before any network call resolves" and
/// retry-ordering scenarios directly assertable.
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<Vec<(Duration, Task)>>,
}

impl ManualScheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks currently queued.
    pub fn pending(&self) -> usize {
        self.queue.lock().expect("scheduler mutex poisoned").len()
    }

    /// Delays requested for the currently queued tasks, in schedule order.
    pub fn queued_delays(&self) -> Vec<Duration> {
        self.queue
            .lock()
            .expect("scheduler mutex poisoned")
            .iter()
            .map(|(delay, _)| *delay)
            .collect()
    }

    /// Runs every task queued at call time, in schedule order.
    ///
    /// Tasks scheduled by the tasks being run stay queued for the next call,
    /// so each call corresponds to one round of timer firings. Returns the
    /// number of tasks run.
    pub async fn run_pending(&self) -> usize {
        let batch: Vec<(Duration, Task)> = {
            let mut queue = self.queue.lock().expect("scheduler mutex poisoned");
            queue.drain(..).collect()
        };
        let count = batch.len();
        for (_, task) in batch {
            task.await;
        }
        count
    }
}

impl RetryScheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) {
        self.queue.lock().expect("scheduler mutex poisoned").push((delay, task));
    }
}
