//! Coarse change batching and draining.
//!
//! Every store mutation queues a flag set here; the notification layer
//! drains batches to decide what to re-publish to the editor. Flags for
//! the same directory merge into one pending batch, which is released
//! once the directory's jobs settle or a maximum coalescing window has
//! elapsed since the first change, whichever comes first. That keeps
//! the editor from seeing N partial updates for one triggered chain.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use strata_types::{Changes, DirHandle};

use crate::document::DocumentStore;
use crate::error::StateError;
use crate::job::JobStore;

/// Maximum time a batch is withheld waiting for the directory's jobs to
/// settle.
pub const MAX_BATCH_TIMESPAN: Duration = Duration::from_secs(1);

/// Pending changes for one directory.
#[derive(Debug, Clone)]
pub struct ChangeBatch {
    pub dir: DirHandle,
    pub changes: Changes,
    pub is_dir_open: bool,
    first_change_time: Instant,
}

pub struct ChangeStore {
    pending: Mutex<HashMap<DirHandle, ChangeBatch>>,
    version: watch::Sender<u64>,
    jobs: Arc<JobStore>,
    documents: Arc<DocumentStore>,
}

impl ChangeStore {
    #[must_use]
    pub fn new(jobs: Arc<JobStore>, documents: Arc<DocumentStore>) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            version: watch::channel(0).0,
            jobs,
            documents,
        }
    }

    /// Merge `changes` into the pending batch for `dir`, creating one if
    /// needed. Merging is an idempotent union; a flag never flips back
    /// within a batch.
    pub fn queue_change(&self, dir: &DirHandle, changes: Changes) {
        {
            let mut pending = self.pending.lock().unwrap();
            match pending.get_mut(dir) {
                Some(batch) => {
                    batch.changes = batch.changes.merge(changes);
                }
                None => {
                    pending.insert(
                        dir.clone(),
                        ChangeBatch {
                            dir: dir.clone(),
                            changes,
                            is_dir_open: self.documents.has_open_documents(dir),
                            first_change_time: Instant::now(),
                        },
                    );
                }
            }
        }
        self.version.send_modify(|v| *v += 1);
    }

    /// Refresh the open-directory mark on a pending batch after a
    /// document open/close.
    pub fn update_dir_open_mark(&self, dir: &DirHandle, is_dir_open: bool) {
        let mut pending = self.pending.lock().unwrap();
        if let Some(batch) = pending.get_mut(dir) {
            batch.is_dir_open = is_dir_open;
        }
    }

    /// Block until a batch is ready for consumption, remove it, and
    /// return it. Readiness: the directory has no queued or running
    /// jobs, or the coalescing window has lapsed.
    pub async fn await_next_batch(
        &self,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<ChangeBatch, StateError> {
        let mut version = self.version.subscribe();
        let mut jobs_version = self.jobs.watch_version();
        loop {
            if *cancel.borrow() {
                return Err(StateError::Stopped);
            }
            version.borrow_and_update();
            jobs_version.borrow_and_update();

            let candidate = {
                let pending = self.pending.lock().unwrap();
                pending
                    .values()
                    .min_by_key(|batch| batch.first_change_time)
                    .map(|batch| (batch.dir.clone(), batch.first_change_time))
            };

            let Some((dir, first_change_time)) = candidate else {
                tokio::select! {
                    changed = version.changed() => {
                        if changed.is_err() {
                            return Err(StateError::Stopped);
                        }
                    }
                    _ = cancel.changed() => {}
                }
                continue;
            };

            let deadline = first_change_time + MAX_BATCH_TIMESPAN;
            if Instant::now() >= deadline || !self.jobs.has_jobs_for_dir(&dir) {
                if let Some(batch) = self.pending.lock().unwrap().remove(&dir) {
                    tracing::debug!(%dir, changes = ?batch.changes, "releasing change batch");
                    return Ok(batch);
                }
                continue;
            }

            // Jobs for the dir are still in flight: wait for one of them
            // to finish, for the window to lapse, or for cancellation.
            tokio::select! {
                changed = jobs_version.changed() => {
                    if changed.is_err() {
                        return Err(StateError::Stopped);
                    }
                }
                changed = version.changed() => {
                    if changed.is_err() {
                        return Err(StateError::Stopped);
                    }
                }
                () = tokio::time::sleep_until(deadline) => {}
                _ = cancel.changed() => {}
            }
        }
    }
}
