//! The per-directory state bag shared by every feature.

use std::fmt;

use strata_state::Record;
use strata_types::{
    DiagnosticSourceState, DirHandle, Metadata, OpState, ReferenceOrigin, ReferenceTarget,
    SourceDiagnostics,
};

use crate::api::ParsedFiles;

/// Everything one feature knows about one directory.
///
/// Owned exclusively by the feature's store and never mutated in place:
/// every update clones the record, mutates the clone, and commits it.
/// Parsed-file handles are shared by reference across clones: the
/// decoder's artifacts are immutable once produced, so sharing is safe
/// and makes sibling-preservation checks a pointer comparison.
#[derive(Clone)]
pub struct FeatureRecord {
    dir: DirHandle,

    pub parsed_files: ParsedFiles,
    pub parsing_err: Option<String>,

    pub diagnostics: SourceDiagnostics,
    pub diagnostics_state: DiagnosticSourceState,

    pub metadata: Metadata,
    pub metadata_err: Option<String>,
    pub metadata_state: OpState,

    pub ref_targets: Vec<ReferenceTarget>,
    pub ref_targets_err: Option<String>,
    pub ref_targets_state: OpState,

    pub ref_origins: Vec<ReferenceOrigin>,
    pub ref_origins_err: Option<String>,
    pub ref_origins_state: OpState,
}

impl FeatureRecord {
    /// Fresh record with every stage at `Unknown`.
    #[must_use]
    pub fn new(dir: DirHandle) -> Self {
        Self {
            dir,
            parsed_files: ParsedFiles::new(),
            parsing_err: None,
            diagnostics: SourceDiagnostics::default(),
            diagnostics_state: DiagnosticSourceState::default(),
            metadata: Metadata::default(),
            metadata_err: None,
            metadata_state: OpState::Unknown,
            ref_targets: Vec::new(),
            ref_targets_err: None,
            ref_targets_state: OpState::Unknown,
            ref_origins: Vec::new(),
            ref_origins_err: None,
            ref_origins_state: OpState::Unknown,
        }
    }
}

impl Record for FeatureRecord {
    fn dir(&self) -> &DirHandle {
        &self.dir
    }
}

impl fmt::Debug for FeatureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureRecord")
            .field("dir", &self.dir)
            .field("parsed_files", &self.parsed_files.len())
            .field("diagnostics", &self.diagnostics.count())
            .field("metadata_state", &self.metadata_state)
            .field("ref_targets_state", &self.ref_targets_state)
            .field("ref_origins_state", &self.ref_origins_state)
            .finish_non_exhaustive()
    }
}
