//! Fake collaborators for tests.
//!
//! The decoder fake interprets a line-oriented stand-in for real
//! configuration syntax, which keeps pipeline tests deterministic
//! without a real parser:
//!
//! - `syntax error`: parse diagnostic on that line
//! - `var NAME` / `out NAME`: metadata declaration
//! - `core CONSTRAINT`: core version requirement
//! - `target ADDR` / `origin ADDR`: reference data
//! - `use NAME`: schema-validated against declarations
//! - `bad metadata`: metadata extraction fails

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use strata_types::{
    AstHandle, DeclKind, Diagnostic, DirHandle, FileName, Metadata, ReferenceOrigin,
    ReferenceTarget, Severity, SourceDiagnostics,
};

use crate::api::{DiagnosticsSink, ParseOutcome, ParsedFiles, ReadOnlyFs, SchemaDecoder};

/// Route `RUST_LOG`-filtered tracing output through the test harness.
pub(crate) fn init_test_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── Filesystem ─────────────────────────────────────────────────────────

pub(crate) struct MemFs {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    unreadable: Mutex<Vec<PathBuf>>,
}

impl MemFs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            files: Mutex::new(HashMap::new()),
            unreadable: Mutex::new(Vec::new()),
        })
    }

    pub fn write(&self, path: impl Into<PathBuf>, content: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(path.into(), content.as_bytes().to_vec());
    }

    pub fn remove(&self, path: &Path) {
        self.files.lock().unwrap().remove(path);
    }

    /// Make reads of `path` fail without removing the directory entry.
    pub fn make_unreadable(&self, path: impl Into<PathBuf>) {
        self.unreadable.lock().unwrap().push(path.into());
    }
}

impl ReadOnlyFs for MemFs {
    fn read_dir(&self, dir: &Path) -> io::Result<Vec<FileName>> {
        let files = self.files.lock().unwrap();
        let mut names: Vec<FileName> = files
            .keys()
            .filter(|path| path.parent() == Some(dir))
            .filter_map(|path| FileName::of(path))
            .collect();
        if names.is_empty() && !files.keys().any(|path| path.starts_with(dir)) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such directory"));
        }
        names.sort();
        Ok(names)
    }

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        if self.unreadable.lock().unwrap().iter().any(|p| p == path) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"));
        }
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }

    fn is_dir(&self, path: &Path) -> io::Result<bool> {
        let files = self.files.lock().unwrap();
        if files.contains_key(path) {
            return Ok(false);
        }
        if files.keys().any(|p| p.starts_with(path)) {
            return Ok(true);
        }
        Err(io::Error::new(io::ErrorKind::NotFound, "no such path"))
    }
}

// ── Decoder ────────────────────────────────────────────────────────────

pub(crate) struct LineDecoder;

fn ast_text(ast: &AstHandle) -> &str {
    ast.downcast_ref::<String>().map_or("", String::as_str)
}

/// Artifacts iterated in stable name order so extracted data is
/// deterministic.
fn sorted_files(files: &ParsedFiles) -> Vec<(&FileName, &AstHandle)> {
    let mut entries: Vec<_> = files.iter().collect();
    entries.sort_by_key(|(name, _)| (*name).clone());
    entries
}

impl SchemaDecoder for LineDecoder {
    fn parse(&self, _file: &FileName, src: &[u8]) -> ParseOutcome {
        let text = String::from_utf8_lossy(src).to_string();
        let diagnostics = text
            .lines()
            .enumerate()
            .filter(|(_, line)| line.trim() == "syntax error")
            .map(|(i, _)| Diagnostic::new(Severity::Error, "syntax error", i as u32, 0))
            .collect();
        ParseOutcome {
            ast: Arc::new(text),
            diagnostics,
        }
    }

    fn load_metadata(&self, files: &ParsedFiles) -> anyhow::Result<Metadata> {
        let mut metadata = Metadata::default();
        for (name, ast) in sorted_files(files) {
            for line in ast_text(ast).lines().map(str::trim) {
                if line == "bad metadata" {
                    anyhow::bail!("metadata extraction failed in {name}");
                }
                if let Some(var) = line.strip_prefix("var ") {
                    metadata
                        .declarations
                        .insert(var.to_string(), DeclKind::Variable);
                } else if let Some(out) = line.strip_prefix("out ") {
                    metadata
                        .declarations
                        .insert(out.to_string(), DeclKind::Output);
                } else if let Some(constraint) = line.strip_prefix("core ") {
                    metadata.core_requirements = Some(constraint.to_string());
                }
            }
            metadata.filenames.push(name.clone());
        }
        Ok(metadata)
    }

    fn reference_targets(
        &self,
        files: &ParsedFiles,
        _metadata: &Metadata,
    ) -> anyhow::Result<Vec<ReferenceTarget>> {
        let mut targets = Vec::new();
        for (name, ast) in sorted_files(files) {
            for (i, line) in ast_text(ast).lines().enumerate() {
                if let Some(address) = line.trim().strip_prefix("target ") {
                    targets.push(ReferenceTarget {
                        address: address.to_string(),
                        file: name.clone(),
                        line: i as u32,
                    });
                }
            }
        }
        Ok(targets)
    }

    fn reference_origins(
        &self,
        files: &ParsedFiles,
        _metadata: &Metadata,
    ) -> anyhow::Result<Vec<ReferenceOrigin>> {
        let mut origins = Vec::new();
        for (name, ast) in sorted_files(files) {
            for (i, line) in ast_text(ast).lines().enumerate() {
                if let Some(address) = line.trim().strip_prefix("origin ") {
                    origins.push(ReferenceOrigin {
                        address: address.to_string(),
                        file: name.clone(),
                        line: i as u32,
                    });
                }
            }
        }
        Ok(origins)
    }

    fn validate_file(
        &self,
        _file: &FileName,
        ast: &AstHandle,
        schema: Option<&Metadata>,
    ) -> Vec<Diagnostic> {
        // No schema means the permissive fallback: nothing to check
        // against, nothing to report.
        let Some(schema) = schema else {
            return Vec::new();
        };
        ast_text(ast)
            .lines()
            .enumerate()
            .filter_map(|(i, line)| {
                let name = line.trim().strip_prefix("use ")?;
                if schema.declarations.contains_key(name) {
                    return None;
                }
                Some(Diagnostic::new(
                    Severity::Error,
                    format!("undeclared \"{name}\""),
                    i as u32,
                    0,
                ))
            })
            .collect()
    }
}

// ── Sink ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct RecordingSink {
    published: Mutex<Vec<(DirHandle, usize)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `(dir, total diagnostic count)` per publication, in order.
    pub fn published(&self) -> Vec<(DirHandle, usize)> {
        self.published.lock().unwrap().clone()
    }
}

impl DiagnosticsSink for RecordingSink {
    fn publish(&self, dir: &DirHandle, diagnostics: &SourceDiagnostics) {
        self.published
            .lock()
            .unwrap()
            .push((dir.clone(), diagnostics.count()));
    }
}
