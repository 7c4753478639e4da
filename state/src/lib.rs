//! Transactional in-memory state.
//!
//! One [`StateStore`] instance backs the whole server: it owns the job
//! store the schedulers drain, the change store the notification layer
//! reads, and the open-document store. Feature crates build their own
//! [`RecordStore`] instances on top and wire them to the shared job and
//! change stores.
//!
//! Everything is single-process and rebuilt on restart; there is no
//! persistence.

mod change;
mod document;
mod error;
mod job;
mod record;

pub use change::{ChangeBatch, ChangeStore, MAX_BATCH_TIMESPAN};
pub use document::DocumentStore;
pub use error::StateError;
pub use job::JobStore;
pub use record::{Record, RecordStore};

use std::sync::Arc;

use strata_types::{DirHandle, FileName};

/// The shared stores, constructed together so the job store can consult
/// open documents and the change store can consult pending jobs.
pub struct StateStore {
    documents: Arc<DocumentStore>,
    jobs: Arc<JobStore>,
    changes: Arc<ChangeStore>,
}

impl StateStore {
    #[must_use]
    pub fn new() -> Self {
        let documents = Arc::new(DocumentStore::new());
        let jobs = Arc::new(JobStore::new(Arc::clone(&documents)));
        let changes = Arc::new(ChangeStore::new(Arc::clone(&jobs), Arc::clone(&documents)));
        Self {
            documents,
            jobs,
            changes,
        }
    }

    #[must_use]
    pub fn documents(&self) -> &Arc<DocumentStore> {
        &self.documents
    }

    #[must_use]
    pub fn jobs(&self) -> &Arc<JobStore> {
        &self.jobs
    }

    #[must_use]
    pub fn changes(&self) -> &Arc<ChangeStore> {
        &self.changes
    }

    /// Track a newly opened document and refresh the open-directory mark
    /// on queued jobs and pending change batches.
    pub fn open_document(&self, dir: &DirHandle, file: FileName) {
        self.documents.open(dir, file);
        self.jobs.update_dir_open_mark(dir, true);
        self.changes.update_dir_open_mark(dir, true);
    }

    /// Track a closed document and refresh the open-directory marks.
    pub fn close_document(&self, dir: &DirHandle, file: &FileName) {
        self.documents.close(dir, file);
        let still_open = self.documents.has_open_documents(dir);
        self.jobs.update_dir_open_mark(dir, still_open);
        self.changes.update_dir_open_mark(dir, still_open);
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}
