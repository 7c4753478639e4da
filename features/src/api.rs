//! Boundary traits for the external collaborators.
//!
//! The pipeline consumes a read-only filesystem, an opaque schema-aware
//! decoder, and a diagnostics sink. Nothing here owns a wire format;
//! protocol-level publication is the sink implementor's concern.

use std::collections::HashMap;
use std::io;
use std::path::Path;

use strata_types::{
    AstHandle, Diagnostic, DirHandle, FileName, Metadata, ReferenceOrigin, ReferenceTarget,
    SourceDiagnostics,
};

/// Parsed artifacts of one directory, keyed by file name.
pub type ParsedFiles = HashMap<FileName, AstHandle>;

/// Read-only filesystem capability consumed by the parse stage.
pub trait ReadOnlyFs: Send + Sync + 'static {
    /// Names of the files (not directories) directly inside `dir`.
    fn read_dir(&self, dir: &Path) -> io::Result<Vec<FileName>>;

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Whether `path` exists and is a directory.
    /// `Err(NotFound)` when it does not exist.
    fn is_dir(&self, path: &Path) -> io::Result<bool>;
}

/// Passthrough to `std::fs`.
pub struct StdFs;

impl ReadOnlyFs for StdFs {
    fn read_dir(&self, dir: &Path) -> io::Result<Vec<FileName>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file()
                && let Some(name) = FileName::of(&entry.path())
            {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn is_dir(&self, path: &Path) -> io::Result<bool> {
        Ok(std::fs::metadata(path)?.is_dir())
    }
}

/// Result of parsing one file.
pub struct ParseOutcome {
    pub ast: AstHandle,
    pub diagnostics: Vec<Diagnostic>,
}

/// The schema-aware decoding library, treated as a black box.
///
/// Given parsed artifacts and metadata it produces reference data and
/// validation diagnostics. `validate_file` with `schema: None` must fall
/// back to a permissive schema with zero attributes and report nothing.
pub trait SchemaDecoder: Send + Sync + 'static {
    fn parse(&self, file: &FileName, src: &[u8]) -> ParseOutcome;

    fn load_metadata(&self, files: &ParsedFiles) -> anyhow::Result<Metadata>;

    fn reference_targets(
        &self,
        files: &ParsedFiles,
        metadata: &Metadata,
    ) -> anyhow::Result<Vec<ReferenceTarget>>;

    fn reference_origins(
        &self,
        files: &ParsedFiles,
        metadata: &Metadata,
    ) -> anyhow::Result<Vec<ReferenceOrigin>>;

    fn validate_file(
        &self,
        file: &FileName,
        ast: &AstHandle,
        schema: Option<&Metadata>,
    ) -> Vec<Diagnostic>;
}

/// Accepts per-directory diagnostics for protocol-level publication.
pub trait DiagnosticsSink: Send + Sync + 'static {
    fn publish(&self, dir: &DirHandle, diagnostics: &SourceDiagnostics);
}
