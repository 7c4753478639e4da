//! Bounded worker pool draining a job storage.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::SchedulerError;
use crate::job::{JobCtx, JobIds, JobPriority};
use crate::storage::JobStorage;

/// A fixed-size pool of worker tasks, all draining one priority class.
///
/// The deployment described in the design runs two instances over the
/// same store: a high-priority one with CPU-derived parallelism and a
/// low-priority one with parallelism 1.
pub struct Scheduler<S: JobStorage> {
    storage: Arc<S>,
    parallelism: usize,
    priority: JobPriority,
    stop_tx: Option<watch::Sender<bool>>,
    workers: Vec<JoinHandle<()>>,
}

impl<S: JobStorage> Scheduler<S> {
    /// Default worker count for the high-priority scheduler.
    #[must_use]
    pub fn default_parallelism() -> usize {
        std::thread::available_parallelism().map_or(1, std::num::NonZero::get)
    }

    #[must_use]
    pub fn new(storage: Arc<S>, parallelism: usize, priority: JobPriority) -> Self {
        Self {
            storage,
            parallelism: parallelism.max(1),
            priority,
            stop_tx: None,
            workers: Vec::new(),
        }
    }

    /// Spawn the worker tasks. Idempotent; a second call is a no-op.
    pub fn start(&mut self) {
        if self.stop_tx.is_some() {
            return;
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        for worker in 0..self.parallelism {
            tracing::debug!(worker, priority = ?self.priority, "launching eval loop");
            let storage = Arc::clone(&self.storage);
            let cancel = stop_rx.clone();
            let priority = self.priority;
            self.workers
                .push(tokio::spawn(eval_loop(storage, priority, cancel, worker)));
        }
        self.stop_tx = Some(stop_tx);
    }

    /// Signal all workers to stop. Jobs already executing run to
    /// completion; nothing new is dispatched.
    pub fn stop(&self) {
        if let Some(tx) = &self.stop_tx {
            let _ = tx.send(true);
            tracing::debug!(priority = ?self.priority, "stopped scheduler");
        }
    }

    /// Stop and wait for every worker to exit.
    pub async fn shutdown(mut self) {
        self.stop();
        for worker in self.workers.drain(..) {
            let _ = worker.await;
        }
    }
}

async fn eval_loop<S: JobStorage>(
    storage: Arc<S>,
    priority: JobPriority,
    cancel: watch::Receiver<bool>,
    worker: usize,
) {
    loop {
        let job = match storage.await_next_job(priority, cancel.clone()).await {
            Ok(job) => job,
            Err(SchedulerError::Stopped) => return,
            Err(err) => {
                tracing::warn!(worker, error = %err, "failed to obtain next job");
                return;
            }
        };

        let ctx = JobCtx::new(job.ignore_state, cancel.clone()).with_job_id(job.id);
        tracing::debug!(id = %job.id, kind = %job.kind, dir = %job.dir, worker, "job started");

        let result = (job.func)(ctx.clone()).await;
        match &result {
            Ok(()) => tracing::debug!(id = %job.id, kind = %job.kind, "job finished"),
            Err(err) => {
                tracing::warn!(id = %job.id, kind = %job.kind, error = %err, "job failed");
            }
        }

        // The continuation runs exactly once per completion, success or
        // failure, before the job is marked done.
        let mut deferred = JobIds::new();
        if let Some(defer) = job.defer {
            match defer(ctx, result.as_ref().err()).await {
                Ok(ids) => deferred = ids,
                Err(err) => {
                    tracing::warn!(id = %job.id, error = %err, "deferred scheduling failed");
                }
            }
        }

        if let Err(err) = storage.finish_job(job.id, result.as_ref().err(), deferred) {
            tracing::warn!(id = %job.id, error = %err, "failed to finish job");
            return;
        }

        if *cancel.borrow() {
            return;
        }
    }
}
