//! Job queueing, deduplication, dependency ordering, and dispatch.
//!
//! The store tracks every job through three states: queued, running,
//! done. Queued jobs hold their executable units; dispatch moves
//! ownership of the unit to a scheduler worker and leaves a running
//! marker behind. Finished jobs disappear entirely unless a continuation
//! spawned further jobs, in which case a done record keeps the spawned
//! IDs so waiters can follow the chain; the record is cleaned up once
//! the chain settles.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

use strata_scheduler::{
    DispatchedJob, Job, JobId, JobIds, JobKind, JobPriority, JobStorage, SchedulerError,
};
use strata_types::{DirHandle, OpState};

use crate::document::DocumentStore;

struct QueuedJob {
    id: JobId,
    dir: DirHandle,
    kind: JobKind,
    priority: JobPriority,
    /// Outstanding dependencies only; drained as they finish. The job
    /// becomes dispatchable when this is empty.
    depends_on: HashSet<JobId>,
    ignore_state: bool,
    is_dir_open: bool,
    func: strata_scheduler::JobFn,
    defer: Option<strata_scheduler::DeferFn>,
}

struct RunningMarker {
    dir: DirHandle,
    kind: JobKind,
}

struct DoneJob {
    /// Continuation-spawned jobs still in flight. The done record exists
    /// only to let waiters follow the chain; it is removed once this
    /// drains.
    deferred: JobIds,
}

#[derive(Default)]
struct Inner {
    queued: BTreeMap<JobId, QueuedJob>,
    running: HashMap<JobId, RunningMarker>,
    done: HashMap<JobId, DoneJob>,
    /// Reverse dependency edges: finished job → queued jobs waiting on
    /// it.
    dependents: HashMap<JobId, Vec<JobId>>,
}

impl Inner {
    /// A job is done when it is neither queued nor running, including
    /// jobs already cleaned up entirely.
    fn is_done(&self, id: JobId) -> bool {
        !self.queued.contains_key(&id) && !self.running.contains_key(&id)
    }

    fn release_dependents_of(&mut self, id: JobId) {
        if let Some(dependents) = self.dependents.remove(&id) {
            for dependent in dependents {
                if let Some(job) = self.queued.get_mut(&dependent) {
                    job.depends_on.remove(&id);
                }
            }
        }
    }

    /// Remove `id` from every done parent's deferred list; a parent
    /// whose list drains is itself cleaned up, recursively.
    fn cleanup_parent_done_jobs_of(&mut self, id: JobId) {
        let parents: Vec<JobId> = self
            .done
            .iter()
            .filter(|(_, d)| d.deferred.contains(&id))
            .map(|(parent, _)| *parent)
            .collect();
        for parent in parents {
            let Some(done) = self.done.get_mut(&parent) else {
                continue;
            };
            done.deferred.retain(|x| *x != id);
            if done.deferred.is_empty() {
                self.done.remove(&parent);
                self.cleanup_parent_done_jobs_of(parent);
            }
        }
    }
}

pub struct JobStore {
    inner: Mutex<Inner>,
    /// Bumped on every mutation; dispatch loops, waiters, and the change
    /// store subscribe to it.
    version: watch::Sender<u64>,
    next_id: AtomicU64,
    documents: Arc<DocumentStore>,
}

impl JobStore {
    #[must_use]
    pub fn new(documents: Arc<DocumentStore>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            version: watch::channel(0).0,
            next_id: AtomicU64::new(1),
            documents,
        }
    }

    /// Queue a job for execution.
    ///
    /// Dedup rule: when the job carries a state probe and no dedup
    /// bypass, a probed state past `Unknown` means this exact unit of
    /// work is already done or in flight: the job is dropped without
    /// ever storing or invoking it and
    /// [`SchedulerError::StateNotChanged`] is returned for the caller to
    /// absorb.
    ///
    /// Dependencies that already finished are pruned at enqueue time;
    /// the rest hold the job back until they finish, successfully or
    /// not.
    pub fn enqueue_job(&self, job: Job) -> Result<JobId, SchedulerError> {
        let Job {
            dir,
            kind,
            priority,
            depends_on,
            ignore_state,
            func,
            defer,
            probe,
        } = job;

        if !ignore_state
            && let Some(probe) = probe
            && probe() != OpState::Unknown
        {
            tracing::debug!(%dir, %kind, "state not changed; job skipped");
            return Err(SchedulerError::StateNotChanged { dir });
        }

        let id = JobId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let is_dir_open = self.documents.has_open_documents(&dir);
        {
            let mut inner = self.inner.lock().unwrap();
            let outstanding: HashSet<JobId> = depends_on
                .into_iter()
                .filter(|dep| !inner.is_done(*dep))
                .collect();
            for dep in &outstanding {
                inner.dependents.entry(*dep).or_default().push(id);
            }
            tracing::debug!(
                %id, %kind, %dir, is_dir_open, ignore_state,
                depends_on = outstanding.len(),
                "enqueueing new job"
            );
            inner.queued.insert(
                id,
                QueuedJob {
                    id,
                    dir,
                    kind,
                    priority,
                    depends_on: outstanding,
                    ignore_state,
                    is_dir_open,
                    func,
                    defer,
                },
            );
        }
        self.version.send_modify(|v| *v += 1);
        Ok(id)
    }

    /// Remove all jobs targeting `dir` that have not started executing.
    /// Running jobs are left to finish.
    pub fn dequeue_jobs_for_dir(&self, dir: &DirHandle) {
        let removed = {
            let mut inner = self.inner.lock().unwrap();
            let ids: Vec<JobId> = inner
                .queued
                .values()
                .filter(|job| job.dir == *dir)
                .map(|job| job.id)
                .collect();
            for id in &ids {
                let job = inner.queued.remove(id).expect("job id was just listed");
                // Dropping a job releases anything that was waiting on it.
                inner.release_dependents_of(*id);
                for dep in &job.depends_on {
                    if let Some(list) = inner.dependents.get_mut(dep) {
                        list.retain(|x| x != id);
                    }
                }
                inner.cleanup_parent_done_jobs_of(*id);
            }
            ids.len()
        };
        if removed > 0 {
            tracing::debug!(%dir, removed, "dequeued jobs for dir");
            self.version.send_modify(|v| *v += 1);
        }
    }

    /// Whether any job for `dir` is queued or running.
    #[must_use]
    pub fn has_jobs_for_dir(&self, dir: &DirHandle) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.queued.values().any(|job| job.dir == *dir)
            || inner.running.values().any(|marker| marker.dir == *dir)
    }

    #[must_use]
    pub fn list_queued_jobs(&self) -> JobIds {
        self.inner.lock().unwrap().queued.keys().copied().collect()
    }

    /// Refresh the open-directory mark on queued jobs after a document
    /// open/close.
    pub fn update_dir_open_mark(&self, dir: &DirHandle, is_dir_open: bool) {
        {
            let mut inner = self.inner.lock().unwrap();
            for job in inner.queued.values_mut().filter(|job| job.dir == *dir) {
                job.is_dir_open = is_dir_open;
            }
        }
        self.version.send_modify(|v| *v += 1);
    }

    /// Subscription to the store's mutation counter; the change store
    /// uses it to learn when jobs settle.
    #[must_use]
    pub fn watch_version(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Wait until every listed job has finished, following
    /// continuation-spawned job IDs transitively. Callers bound the wait
    /// with `tokio::time::timeout`.
    pub async fn wait_for_jobs(&self, ids: JobIds) {
        let mut pending = ids;
        while let Some(id) = pending.pop() {
            let deferred = self.wait_for_job(id).await;
            pending.extend(deferred);
        }
    }

    async fn wait_for_job(&self, id: JobId) -> JobIds {
        let mut version = self.version.subscribe();
        loop {
            version.borrow_and_update();
            {
                let inner = self.inner.lock().unwrap();
                if let Some(done) = inner.done.get(&id) {
                    return done.deferred.clone();
                }
                if inner.is_done(id) {
                    // Cleaned up entirely: the job and its chain settled.
                    return JobIds::new();
                }
            }
            if version.changed().await.is_err() {
                return JobIds::new();
            }
        }
    }

    /// Dispatch one ready job of `priority`, preferring jobs whose
    /// directory has open documents, then enqueue order.
    fn try_dispatch(&self, priority: JobPriority) -> Option<DispatchedJob> {
        let dispatched = {
            let mut inner = self.inner.lock().unwrap();
            let id = inner
                .queued
                .values()
                .filter(|job| job.priority == priority && job.depends_on.is_empty())
                .min_by_key(|job| (!job.is_dir_open, job.id))
                .map(|job| job.id)?;
            let job = inner.queued.remove(&id).expect("job id was just selected");
            inner.running.insert(
                id,
                RunningMarker {
                    dir: job.dir.clone(),
                    kind: job.kind,
                },
            );
            tracing::debug!(
                %id, kind = %job.kind, dir = %job.dir, is_dir_open = job.is_dir_open,
                "dispatching next job"
            );
            DispatchedJob {
                id,
                dir: job.dir,
                kind: job.kind,
                ignore_state: job.ignore_state,
                func: job.func,
                defer: job.defer,
            }
        };
        self.version.send_modify(|v| *v += 1);
        Some(dispatched)
    }

    fn finish(
        &self,
        id: JobId,
        job_err: Option<&anyhow::Error>,
        deferred: JobIds,
    ) -> Result<(), SchedulerError> {
        {
            let mut inner = self.inner.lock().unwrap();
            let marker = inner
                .running
                .remove(&id)
                .ok_or(SchedulerError::JobNotFound(id))?;
            tracing::debug!(
                %id, kind = %marker.kind, dir = %marker.dir,
                err = ?job_err.map(|e| e.to_string()),
                deferred = deferred.len(),
                "finishing job"
            );
            inner.release_dependents_of(id);
            if deferred.is_empty() {
                inner.cleanup_parent_done_jobs_of(id);
            } else {
                inner.done.insert(id, DoneJob { deferred });
            }
        }
        self.version.send_modify(|v| *v += 1);
        Ok(())
    }
}

impl JobStorage for JobStore {
    async fn await_next_job(
        &self,
        priority: JobPriority,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<DispatchedJob, SchedulerError> {
        let mut version = self.version.subscribe();
        loop {
            if *cancel.borrow() {
                return Err(SchedulerError::Stopped);
            }
            // Mark the current version seen before scanning the queue so
            // a concurrent enqueue wakes the select below.
            version.borrow_and_update();
            if let Some(job) = self.try_dispatch(priority) {
                return Ok(job);
            }
            tokio::select! {
                changed = version.changed() => {
                    if changed.is_err() {
                        return Err(SchedulerError::Stopped);
                    }
                }
                _ = cancel.changed() => {}
            }
        }
    }

    fn finish_job(
        &self,
        id: JobId,
        job_err: Option<&anyhow::Error>,
        deferred: JobIds,
    ) -> Result<(), SchedulerError> {
        self.finish(id, job_err, deferred)
    }
}
