//! Per-job dispatcher: a fixed pool of workers fed from one job queue.
//!
//! ## Architecture
//! ```text
//! job queue ──► dispatch loop ──► idle worker (oneshot) ──► Runnable::run
//!                    ▲                                          │
//!                    └──────── worker pool ◄── re-register ─────┘
//! ```
//! A worker announces itself idle by sending a fresh oneshot sender into the
//! pool; the dispatch loop waits for one before handing over the next
//! runnable, which caps concurrency at the worker count. Dropping the
//! dispatcher closes the job queue: the loop drains what is queued, then
//! closes the pool and workers exit after their current runnable.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{mpsc, oneshot};

use crate::runnable::{Runnable, Runtime, panic_reason};

/// Counters of one dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub workers: usize,
    pub busy: usize,
    /// Highest `busy` value seen.
    pub peak_busy: usize,
    pub dispatched: u64,
}

#[derive(Default)]
struct Counters {
    busy: AtomicUsize,
    peak_busy: AtomicUsize,
    dispatched: AtomicU64,
}

pub struct Dispatcher {
    job_id: String,
    workers: usize,
    queue: mpsc::UnboundedSender<Runnable>,
    counters: Arc<Counters>,
}

impl Dispatcher {
    /// Spawn the dispatch loop and `workers` workers.
    pub fn start(job_id: &str, workers: usize, rt: Arc<Runtime>) -> Self {
        let workers = workers.max(1);
        let (queue, mut jobs_rx) = mpsc::unbounded_channel::<Runnable>();
        let (pool_tx, mut pool_rx) = mpsc::channel::<oneshot::Sender<Runnable>>(workers);
        let counters = Arc::new(Counters::default());

        for n in 0..workers {
            tokio::spawn(worker(n, pool_tx.clone(), rt.clone(), counters.clone()));
        }
        drop(pool_tx);

        let id = job_id.to_string();
        let loop_counters = counters.clone();
        tokio::spawn(async move {
            while let Some(runnable) = jobs_rx.recv().await {
                let Some(idle) = pool_rx.recv().await else {
                    runnable.task.interrupt("no worker left");
                    runnable.task.release();
                    break;
                };
                if let Err(runnable) = idle.send(runnable) {
                    runnable.task.interrupt("worker gone");
                    runnable.task.release();
                    continue;
                }
                loop_counters.dispatched.fetch_add(1, Ordering::Relaxed);
            }
            tracing::debug!("🛑 Dispatcher for job {id} drained");
        });

        tracing::info!("🧵 Dispatcher started for job {job_id} ({workers} workers)");
        Self {
            job_id: job_id.to_string(),
            workers,
            queue,
            counters,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Queue a runnable. Hands it back if the dispatcher loop is gone.
    pub fn dispatch(&self, runnable: Runnable) -> Result<(), Runnable> {
        self.queue.send(runnable).map_err(|e| e.0)
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            workers: self.workers,
            busy: self.counters.busy.load(Ordering::Relaxed),
            peak_busy: self.counters.peak_busy.load(Ordering::Relaxed),
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting work. Queued and running runnables still complete.
    pub fn stop(self) {
        tracing::info!("🛑 Stopping dispatcher for job {}", self.job_id);
    }
}

async fn worker(
    n: usize,
    pool: mpsc::Sender<oneshot::Sender<Runnable>>,
    rt: Arc<Runtime>,
    counters: Arc<Counters>,
) {
    loop {
        let (tx, rx) = oneshot::channel();
        if pool.send(tx).await.is_err() {
            break;
        }
        let Ok(runnable) = rx.await else {
            break;
        };

        let busy = counters.busy.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak_busy.fetch_max(busy, Ordering::SeqCst);

        let task = runnable.task.clone();
        let action_id = runnable.action.id.clone();
        if let Err(panic) = AssertUnwindSafe(runnable.run(&rt)).catch_unwind().await {
            let reason = panic_reason(panic.as_ref());
            tracing::error!("💥 Action {action_id} panicked in worker {n}: {reason}");
            task.fail(&format!("action {action_id} panicked: {reason}"));
            task.release();
        }

        counters.busy.fetch_sub(1, Ordering::SeqCst);
    }
    tracing::trace!("worker {n} exited");
}
