//! Typed mutations over the generic record table.
//!
//! Every payload-setting update also commits the corresponding `Loaded`
//! transition in the same copy-on-write commit, so `Loaded` is never
//! visible before its payload. Updates that change what the editor sees
//! queue coarse change flags by diffing the pre- and post-commit
//! snapshots.

use std::sync::Arc;
use std::time::Duration;

use strata_state::{ChangeStore, JobStore, RecordStore, StateError};
use strata_types::{
    Changes, DiagnosticSource, DirHandle, FileDiagnostics, Metadata, OpState, ReferenceOrigin,
    ReferenceTarget,
};

use crate::api::ParsedFiles;
use crate::engine::record::FeatureRecord;

pub struct FeatureStore {
    name: &'static str,
    records: RecordStore<FeatureRecord>,
    jobs: Arc<JobStore>,
    changes: Arc<ChangeStore>,
}

impl FeatureStore {
    #[must_use]
    pub fn new(name: &'static str, jobs: Arc<JobStore>, changes: Arc<ChangeStore>) -> Self {
        Self {
            name,
            records: RecordStore::new(),
            jobs,
            changes,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    // ── Lifecycle ──────────────────────────────────────────────────────

    pub fn add(&self, dir: &DirHandle) -> Result<(), StateError> {
        let record = FeatureRecord::new(dir.clone());
        self.records.add(record.clone())?;
        self.queue_record_change(dir, None, Some(&record));
        Ok(())
    }

    /// Returns whether a record was inserted.
    pub fn add_if_not_exists(&self, dir: &DirHandle) -> bool {
        if self.records.exists(dir) {
            return false;
        }
        self.add(dir).is_ok()
    }

    /// Remove the record, dequeue its pending jobs, and queue a removal
    /// change. A second call for the same directory is a no-op.
    pub fn remove(&self, dir: &DirHandle) {
        self.jobs.dequeue_jobs_for_dir(dir);
        if let Some(old) = self.records.remove(dir) {
            tracing::debug!(feature = self.name, %dir, "removed record");
            self.queue_record_change(dir, Some(&old), None);
        }
    }

    pub fn get(&self, dir: &DirHandle) -> Result<Arc<FeatureRecord>, StateError> {
        self.records.get(dir)
    }

    #[must_use]
    pub fn exists(&self, dir: &DirHandle) -> bool {
        self.records.exists(dir)
    }

    #[must_use]
    pub fn list(&self) -> Vec<Arc<FeatureRecord>> {
        self.records.list()
    }

    // ── Payload updates ────────────────────────────────────────────────

    pub fn update_parsed_files(
        &self,
        dir: &DirHandle,
        files: ParsedFiles,
        err: Option<String>,
    ) -> Result<(), StateError> {
        self.records.update(dir, |record| {
            record.parsed_files = files;
            record.parsing_err = err;
        })?;
        Ok(())
    }

    pub fn update_diagnostics(
        &self,
        dir: &DirHandle,
        source: DiagnosticSource,
        diags: FileDiagnostics,
    ) -> Result<(), StateError> {
        let (old, new) = self.records.update(dir, |record| {
            record.diagnostics.replace(source, diags);
            record.diagnostics_state.set(source, OpState::Loaded);
        })?;
        self.queue_record_change(dir, Some(&old), Some(&new));
        Ok(())
    }

    pub fn update_metadata(
        &self,
        dir: &DirHandle,
        metadata: Metadata,
        err: Option<String>,
    ) -> Result<(), StateError> {
        let (old, new) = self.records.update(dir, |record| {
            record.metadata = metadata;
            record.metadata_err = err;
            record.metadata_state = OpState::Loaded;
        })?;
        self.queue_record_change(dir, Some(&old), Some(&new));
        Ok(())
    }

    pub fn update_reference_targets(
        &self,
        dir: &DirHandle,
        targets: Vec<ReferenceTarget>,
        err: Option<String>,
    ) -> Result<(), StateError> {
        self.records.update(dir, |record| {
            record.ref_targets = targets;
            record.ref_targets_err = err;
            record.ref_targets_state = OpState::Loaded;
        })?;
        Ok(())
    }

    pub fn update_reference_origins(
        &self,
        dir: &DirHandle,
        origins: Vec<ReferenceOrigin>,
        err: Option<String>,
    ) -> Result<(), StateError> {
        let (old, new) = self.records.update(dir, |record| {
            record.ref_origins = origins;
            record.ref_origins_err = err;
            record.ref_origins_state = OpState::Loaded;
        })?;
        self.queue_record_change(dir, Some(&old), Some(&new));
        Ok(())
    }

    // ── Stage-state transitions ────────────────────────────────────────

    pub fn set_diagnostics_state(
        &self,
        dir: &DirHandle,
        source: DiagnosticSource,
        state: OpState,
    ) -> Result<(), StateError> {
        self.records.update(dir, |record| {
            record.diagnostics_state.set(source, state);
        })?;
        Ok(())
    }

    pub fn set_metadata_state(&self, dir: &DirHandle, state: OpState) -> Result<(), StateError> {
        self.records.update(dir, |record| record.metadata_state = state)?;
        Ok(())
    }

    pub fn set_reference_targets_state(
        &self,
        dir: &DirHandle,
        state: OpState,
    ) -> Result<(), StateError> {
        self.records
            .update(dir, |record| record.ref_targets_state = state)?;
        Ok(())
    }

    pub fn set_reference_origins_state(
        &self,
        dir: &DirHandle,
        state: OpState,
    ) -> Result<(), StateError> {
        self.records
            .update(dir, |record| record.ref_origins_state = state)?;
        Ok(())
    }

    // ── Dedup probes ───────────────────────────────────────────────────
    //
    // A missing record probes as Unknown so enqueueing against a
    // just-removed directory degrades to a RecordNotFound inside the job
    // rather than a silent skip.

    #[must_use]
    pub fn diagnostics_source_state(&self, dir: &DirHandle, source: DiagnosticSource) -> OpState {
        self.records
            .get(dir)
            .map(|record| record.diagnostics_state.get(source))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn metadata_state(&self, dir: &DirHandle) -> OpState {
        self.records
            .get(dir)
            .map(|record| record.metadata_state)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn reference_targets_state(&self, dir: &DirHandle) -> OpState {
        self.records
            .get(dir)
            .map(|record| record.ref_targets_state)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn reference_origins_state(&self, dir: &DirHandle) -> OpState {
        self.records
            .get(dir)
            .map(|record| record.ref_origins_state)
            .unwrap_or_default()
    }

    // ── Readiness ──────────────────────────────────────────────────────

    /// Resolves once the directory's metadata reaches `Loaded`; returns
    /// immediately when it already has. Used for cross-feature
    /// coordination without polling.
    pub async fn metadata_ready(
        &self,
        dir: &DirHandle,
        timeout: Duration,
    ) -> Result<(), StateError> {
        self.records
            .wait_for(dir, timeout, |record| record.metadata_state.is_loaded())
            .await
    }

    /// Diff two snapshots into coarse change flags and queue them.
    ///
    /// Comparing full diagnostic sets would be expensive; any non-zero
    /// count on either side counts as a diagnostics change.
    fn queue_record_change(
        &self,
        dir: &DirHandle,
        old: Option<&FeatureRecord>,
        new: Option<&FeatureRecord>,
    ) {
        let old_diags = old.map_or(0, |r| r.diagnostics.count());
        let new_diags = new.map_or(0, |r| r.diagnostics.count());
        let old_origins = old.map_or(0, |r| r.ref_origins.len());
        let new_origins = new.map_or(0, |r| r.ref_origins.len());
        let old_core = old.and_then(|r| r.metadata.core_requirements.clone());
        let new_core = new.and_then(|r| r.metadata.core_requirements.clone());

        let changes = Changes {
            is_removal: new.is_none(),
            diagnostics: old_diags > 0 || new_diags > 0,
            reference_origins: old_origins != new_origins,
            core_requirements: old_core != new_core,
        };
        self.changes.queue_change(dir, changes);
    }
}

impl std::fmt::Debug for FeatureStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureStore")
            .field("name", &self.name)
            .field("records", &self.records.list().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_state::StateStore;
    use strata_types::{Diagnostic, FileName, Severity};

    use tokio::sync::watch;

    fn test_store() -> (StateStore, FeatureStore) {
        let state = StateStore::new();
        let feature = FeatureStore::new(
            "variables",
            Arc::clone(state.jobs()),
            Arc::clone(state.changes()),
        );
        (state, feature)
    }

    fn dir(path: &str) -> DirHandle {
        DirHandle::from_path(path)
    }

    fn one_error_bucket(file: &str) -> FileDiagnostics {
        let mut bucket = FileDiagnostics::new();
        bucket.insert(
            FileName::new(file),
            vec![Diagnostic::new(Severity::Error, "unexpected block", 3, 0)],
        );
        bucket
    }

    #[tokio::test]
    async fn test_update_diagnostics_commits_loaded_with_payload() {
        let (_state, store) = test_store();
        let d = dir("/tmp/mod");
        store.add(&d).unwrap();

        store
            .update_diagnostics(&d, DiagnosticSource::HclParsing, one_error_bucket("a.hcl"))
            .unwrap();

        let record = store.get(&d).unwrap();
        assert_eq!(
            record.diagnostics_state.get(DiagnosticSource::HclParsing),
            OpState::Loaded
        );
        assert_eq!(record.diagnostics.count(), 1);
    }

    #[tokio::test]
    async fn test_diagnostics_update_queues_change_flag() {
        let (state, store) = test_store();
        let d = dir("/tmp/mod");
        store.add(&d).unwrap();
        store
            .update_diagnostics(&d, DiagnosticSource::HclParsing, one_error_bucket("a.hcl"))
            .unwrap();

        // Drain batches until the diagnostics flag shows up.
        let (_tx, cancel) = watch::channel(false);
        let mut saw_diagnostics = false;
        for _ in 0..3 {
            let batch = state.changes().await_next_batch(cancel.clone()).await.unwrap();
            if batch.changes.diagnostics {
                saw_diagnostics = true;
                break;
            }
        }
        assert!(saw_diagnostics);
    }

    #[tokio::test]
    async fn test_remove_queues_removal_exactly_once() {
        let (state, store) = test_store();
        let d = dir("/tmp/mod");
        store.add(&d).unwrap();

        store.remove(&d);
        store.remove(&d);
        assert!(!store.exists(&d));
        assert!(store.list().is_empty());

        let (_tx, cancel) = watch::channel(false);
        let mut removals = 0;
        loop {
            let batch = tokio::time::timeout(
                Duration::from_millis(100),
                state.changes().await_next_batch(cancel.clone()),
            )
            .await;
            match batch {
                Ok(Ok(batch)) if batch.changes.is_removal => removals += 1,
                Ok(Ok(_)) => {}
                _ => break,
            }
        }
        assert_eq!(removals, 1);
    }

    #[tokio::test]
    async fn test_metadata_update_flags_core_requirement_change() {
        let (state, store) = test_store();
        let d = dir("/tmp/mod");
        store.add(&d).unwrap();

        let meta = Metadata {
            core_requirements: Some(">= 1.2".to_string()),
            ..Metadata::default()
        };
        store.update_metadata(&d, meta, None).unwrap();

        let (_tx, cancel) = watch::channel(false);
        let batch = state.changes().await_next_batch(cancel).await.unwrap();
        assert!(batch.changes.core_requirements);
    }

    #[tokio::test]
    async fn test_probes_default_to_unknown_for_missing_record() {
        let (_state, store) = test_store();
        let d = dir("/tmp/nowhere");
        assert_eq!(
            store.diagnostics_source_state(&d, DiagnosticSource::HclParsing),
            OpState::Unknown
        );
        assert_eq!(store.metadata_state(&d), OpState::Unknown);
    }

    #[tokio::test]
    async fn test_metadata_ready_resolves_on_update() {
        let (_state, store) = test_store();
        let store = Arc::new(store);
        let d = dir("/tmp/mod");
        store.add(&d).unwrap();

        let waiter = {
            let store = Arc::clone(&store);
            let d = d.clone();
            tokio::spawn(async move { store.metadata_ready(&d, Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        store.update_metadata(&d, Metadata::default(), None).unwrap();
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_dequeues_jobs_on_remove() {
        let (state, store) = test_store();
        let d = dir("/tmp/mod");
        store.add(&d).unwrap();

        state
            .jobs()
            .enqueue_job(strata_scheduler::Job::new(
                d.clone(),
                strata_scheduler::JobKind::new("parse"),
                |_ctx| async { Ok(()) },
            ))
            .unwrap();
        assert!(state.jobs().has_jobs_for_dir(&d));

        store.remove(&d);
        assert!(!state.jobs().has_jobs_for_dir(&d));
    }
}
