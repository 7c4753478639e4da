//! Event handling and job-chain wiring, shared by every feature.
//!
//! A [`Pipeline`] is the generic engine configured by one
//! [`FeatureDefinition`]: it decides event relevance, keeps the feature
//! store's lifecycle in step with the filesystem, and enqueues the
//! parse → metadata → references → validation chain with the dedup
//! probes and dependency edges each stage needs.

use std::io;
use std::path::Path;
use std::sync::Arc;

use strata_bus::{DidChangeWatchedEvent, FileChangeType};
use strata_scheduler::{Job, JobId, JobIds, JobKind, SchedulerError};
use strata_state::{DocumentStore, JobStore};
use strata_types::{DiagnosticSource, DirHandle, FileName, LanguageId, OpState, Options};

use crate::api::{ReadOnlyFs, SchemaDecoder};
use crate::engine::jobs;
use crate::engine::store::FeatureStore;

/// Thin per-feature configuration of the generic pipeline.
pub struct FeatureDefinition {
    pub name: &'static str,
    /// Editor language ID that makes an opened document relevant.
    pub language_id: &'static str,
    /// Which file names in a directory belong to this feature.
    pub file_matches: fn(&FileName) -> bool,

    pub parse_kind: JobKind,
    pub metadata_kind: JobKind,
    pub ref_targets_kind: JobKind,
    pub ref_origins_kind: JobKind,
    pub schema_validation_kind: JobKind,
    pub ref_validation_kind: JobKind,
}

pub struct Pipeline {
    def: FeatureDefinition,
    store: Arc<FeatureStore>,
    jobs: Arc<JobStore>,
    documents: Arc<DocumentStore>,
    fs: Arc<dyn ReadOnlyFs>,
    decoder: Arc<dyn SchemaDecoder>,
    /// Store of the feature providing the schema context for
    /// validation; `None` means the feature validates against its own
    /// metadata.
    schema_store: Option<Arc<FeatureStore>>,
    /// Captured at construction; chains in flight never see a change.
    options: Options,
}

/// Absorb the dedup sentinel: a skipped stage is not an error.
fn absorb(result: Result<JobId, SchedulerError>) -> Result<Option<JobId>, SchedulerError> {
    match result {
        Ok(id) => Ok(Some(id)),
        Err(err) if err.is_state_not_changed() => Ok(None),
        Err(err) => Err(err),
    }
}

impl Pipeline {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        def: FeatureDefinition,
        store: Arc<FeatureStore>,
        jobs: Arc<JobStore>,
        documents: Arc<DocumentStore>,
        fs: Arc<dyn ReadOnlyFs>,
        decoder: Arc<dyn SchemaDecoder>,
        schema_store: Option<Arc<FeatureStore>>,
        options: Options,
    ) -> Arc<Self> {
        Arc::new(Self {
            def,
            store,
            jobs,
            documents,
            fs,
            decoder,
            schema_store,
            options,
        })
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.def.name
    }

    #[must_use]
    pub fn store(&self) -> &Arc<FeatureStore> {
        &self.store
    }

    // ── Event handlers ─────────────────────────────────────────────────

    /// A directory walk found candidate files. Creates the record; jobs
    /// are scheduled only once the directory becomes interesting (open
    /// or changed).
    pub fn discover(&self, dir: &DirHandle, files: &[FileName]) {
        if files.iter().any(|file| (self.def.file_matches)(file))
            && self.store.add_if_not_exists(dir)
        {
            tracing::debug!(feature = self.def.name, %dir, "discovered relevant files");
        }
    }

    /// The directory can be relevant because the walker created a record
    /// for it, or because the opened document's language matches.
    pub fn did_open(
        self: Arc<Self>,
        dir: &DirHandle,
        language_id: &LanguageId,
    ) -> Result<JobIds, SchedulerError> {
        if *language_id == self.def.language_id {
            self.store.add_if_not_exists(dir);
        }
        if !self.store.exists(dir) {
            return Ok(JobIds::new());
        }
        self.schedule(dir, false, None)
    }

    pub fn did_change(
        self: Arc<Self>,
        dir: &DirHandle,
        file: &FileName,
        language_id: &LanguageId,
    ) -> Result<JobIds, SchedulerError> {
        if !self.store.exists(dir) {
            return Ok(JobIds::new());
        }
        // Single-file granularity only applies to this feature's own
        // documents; a change to a sibling feature's file still triggers
        // a full refresh of our derived state.
        let changed_file = (*language_id == self.def.language_id).then(|| file.clone());
        self.schedule(dir, true, changed_file)
    }

    pub fn did_change_watched(
        self: Arc<Self>,
        event: &DidChangeWatchedEvent,
    ) -> Result<JobIds, SchedulerError> {
        match event.change_type {
            FileChangeType::Deleted => self.watched_delete(&event.path),
            FileChangeType::Changed | FileChangeType::Created => {
                let dir = if event.is_dir {
                    DirHandle::from_path(&event.path)
                } else {
                    DirHandle::parent_of(&event.path)
                };
                // Skip redundant work for directories nobody is viewing;
                // the next didOpen reparses from scratch anyway.
                if !self.documents.has_open_documents(&dir) || !self.store.exists(&dir) {
                    return Ok(JobIds::new());
                }
                self.schedule(&dir, true, None)
            }
        }
    }

    /// A deletion notification may name a file or a directory; try the
    /// path as a directory record first, then fall back to its parent.
    fn watched_delete(self: Arc<Self>, path: &Path) -> Result<JobIds, SchedulerError> {
        let as_dir = DirHandle::from_path(path);
        if self.store.exists(&as_dir) {
            self.store.remove(&as_dir);
            return Ok(JobIds::new());
        }

        let parent = DirHandle::parent_of(path);
        if !self.store.exists(&parent) {
            return Ok(JobIds::new());
        }
        match self.fs.is_dir(parent.path()) {
            Ok(true) => {}
            Ok(false) => {
                // Replaced by a non-directory; the record is stale.
                self.store.remove(&parent);
                return Ok(JobIds::new());
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                self.store.remove(&parent);
                return Ok(JobIds::new());
            }
            Err(err) => {
                tracing::warn!(
                    feature = self.def.name, dir = %parent, error = %err,
                    "failed to stat parent of deleted path"
                );
                return Ok(JobIds::new());
            }
        }

        // A file of the directory went away; reparse if anyone is
        // looking.
        if !self.documents.has_open_documents(&parent) {
            return Ok(JobIds::new());
        }
        self.schedule(&parent, true, None)
    }

    // ── Job-chain wiring ───────────────────────────────────────────────

    /// Enqueue the analysis chain for `dir`.
    ///
    /// Returns the first-level job IDs; continuation-spawned IDs are
    /// reachable through the job store's wait-chain bookkeeping.
    pub fn schedule(
        self: Arc<Self>,
        dir: &DirHandle,
        ignore_state: bool,
        changed_file: Option<FileName>,
    ) -> Result<JobIds, SchedulerError> {
        let mut ids = JobIds::new();

        let parse_id = {
            let pipeline = Arc::clone(&self);
            let job_dir = dir.clone();
            let file = changed_file.clone();
            let probe_store = Arc::clone(&self.store);
            let probe_dir = dir.clone();
            absorb(self.jobs.enqueue_job(
                Job::new(dir.clone(), self.def.parse_kind, move |ctx| async move {
                    jobs::parse(
                        &ctx,
                        pipeline.fs.as_ref(),
                        pipeline.decoder.as_ref(),
                        &pipeline.store,
                        pipeline.def.file_matches,
                        &job_dir,
                        file.as_ref(),
                    )
                })
                .probe(move || {
                    probe_store.diagnostics_source_state(&probe_dir, DiagnosticSource::HclParsing)
                })
                .ignore_state(ignore_state),
            ))?
        };
        if let Some(id) = parse_id {
            self.mark_diagnostics_queued(dir, DiagnosticSource::HclParsing);
            ids.push(id);
        }

        let metadata_job = {
            let pipeline = Arc::clone(&self);
            let job_dir = dir.clone();
            let probe_store = Arc::clone(&self.store);
            let probe_dir = dir.clone();
            let defer_pipeline = Arc::clone(&self);
            let defer_dir = dir.clone();
            let defer_file = changed_file.clone();
            Job::new(dir.clone(), self.def.metadata_kind, move |_ctx| async move {
                jobs::load_metadata(pipeline.decoder.as_ref(), &pipeline.store, &job_dir)
            })
            .depends_on(parse_id.into_iter().collect())
            .ignore_state(ignore_state)
            .probe(move || probe_store.metadata_state(&probe_dir))
            .defer(move |ctx, job_err| {
                if let Some(err) = job_err {
                    tracing::warn!(
                        feature = defer_pipeline.def.name, dir = %defer_dir, error = %err,
                        "metadata load failed; downstream stages run best-effort"
                    );
                }
                let metadata_id = ctx.job_id();
                Box::pin(async move {
                    defer_pipeline.schedule_post_metadata(
                        &defer_dir,
                        ignore_state,
                        defer_file,
                        metadata_id,
                    )
                })
            })
        };
        if let Some(id) = absorb(self.jobs.enqueue_job(metadata_job))? {
            self.mark_metadata_queued(dir);
            ids.push(id);
        }

        Ok(ids)
    }

    /// Continuation of the metadata stage: reference collection, plus
    /// the two validation stages when enhanced validation was enabled
    /// at pipeline start.
    fn schedule_post_metadata(
        self: Arc<Self>,
        dir: &DirHandle,
        ignore_state: bool,
        changed_file: Option<FileName>,
        metadata_id: Option<JobId>,
    ) -> anyhow::Result<JobIds> {
        let mut ids = JobIds::new();
        let metadata_deps: JobIds = metadata_id.into_iter().collect();

        let targets_id = {
            let pipeline = Arc::clone(&self);
            let job_dir = dir.clone();
            let probe_store = Arc::clone(&self.store);
            let probe_dir = dir.clone();
            absorb(self.jobs.enqueue_job(
                Job::new(dir.clone(), self.def.ref_targets_kind, move |_ctx| async move {
                    jobs::decode_reference_targets(
                        pipeline.decoder.as_ref(),
                        &pipeline.store,
                        &job_dir,
                    )
                })
                .depends_on(metadata_deps.clone())
                .ignore_state(ignore_state)
                .probe(move || probe_store.reference_targets_state(&probe_dir)),
            ))?
        };
        if let Some(id) = targets_id {
            self.mark_reference_targets_queued(dir);
            ids.push(id);
        }

        let origins_id = {
            let pipeline = Arc::clone(&self);
            let job_dir = dir.clone();
            let probe_store = Arc::clone(&self.store);
            let probe_dir = dir.clone();
            absorb(self.jobs.enqueue_job(
                Job::new(dir.clone(), self.def.ref_origins_kind, move |_ctx| async move {
                    jobs::decode_reference_origins(
                        pipeline.decoder.as_ref(),
                        &pipeline.store,
                        &job_dir,
                    )
                })
                .depends_on(metadata_deps)
                .ignore_state(ignore_state)
                .probe(move || probe_store.reference_origins_state(&probe_dir)),
            ))?
        };
        if let Some(id) = origins_id {
            self.mark_reference_origins_queued(dir);
            ids.push(id);
        }

        if !self.options.enable_enhanced_validation {
            return Ok(ids);
        }

        let schema_validation_id = {
            let pipeline = Arc::clone(&self);
            let job_dir = dir.clone();
            let file = changed_file;
            let probe_store = Arc::clone(&self.store);
            let probe_dir = dir.clone();
            absorb(self.jobs.enqueue_job(
                Job::new(
                    dir.clone(),
                    self.def.schema_validation_kind,
                    move |ctx| async move {
                        jobs::schema_validation(
                            &ctx,
                            pipeline.decoder.as_ref(),
                            &pipeline.store,
                            pipeline.schema_store.as_deref(),
                            &job_dir,
                            file.as_ref(),
                        )
                        .await
                    },
                )
                .ignore_state(ignore_state)
                .probe(move || {
                    probe_store
                        .diagnostics_source_state(&probe_dir, DiagnosticSource::SchemaValidation)
                }),
            ))?
        };
        if let Some(id) = schema_validation_id {
            self.mark_diagnostics_queued(dir, DiagnosticSource::SchemaValidation);
            ids.push(id);
        }

        let reference_deps: JobIds = targets_id.into_iter().chain(origins_id).collect();
        let reference_validation_id = {
            let pipeline = Arc::clone(&self);
            let job_dir = dir.clone();
            let probe_store = Arc::clone(&self.store);
            let probe_dir = dir.clone();
            absorb(self.jobs.enqueue_job(
                Job::new(
                    dir.clone(),
                    self.def.ref_validation_kind,
                    move |_ctx| async move {
                        jobs::reference_validation(
                            &pipeline.store,
                            pipeline.schema_store.as_deref(),
                            &job_dir,
                        )
                    },
                )
                .depends_on(reference_deps)
                .ignore_state(ignore_state)
                .probe(move || {
                    probe_store
                        .diagnostics_source_state(&probe_dir, DiagnosticSource::ReferenceValidation)
                }),
            ))?
        };
        if let Some(id) = reference_validation_id {
            self.mark_diagnostics_queued(dir, DiagnosticSource::ReferenceValidation);
            ids.push(id);
        }

        Ok(ids)
    }

    // The record can disappear between enqueue and the mark; the job
    // itself then fails fast on RecordNotFound, so a debug line is
    // enough here.

    fn mark_diagnostics_queued(&self, dir: &DirHandle, source: DiagnosticSource) {
        if let Err(err) = self.store.set_diagnostics_state(dir, source, OpState::Queued) {
            tracing::debug!(feature = self.def.name, %dir, error = %err, "queued mark skipped");
        }
    }

    fn mark_metadata_queued(&self, dir: &DirHandle) {
        if let Err(err) = self.store.set_metadata_state(dir, OpState::Queued) {
            tracing::debug!(feature = self.def.name, %dir, error = %err, "queued mark skipped");
        }
    }

    fn mark_reference_targets_queued(&self, dir: &DirHandle) {
        if let Err(err) = self.store.set_reference_targets_state(dir, OpState::Queued) {
            tracing::debug!(feature = self.def.name, %dir, error = %err, "queued mark skipped");
        }
    }

    fn mark_reference_origins_queued(&self, dir: &DirHandle) {
        if let Err(err) = self.store.set_reference_origins_state(dir, OpState::Queued) {
            tracing::debug!(feature = self.def.name, %dir, error = %err, "queued mark skipped");
        }
    }
}
