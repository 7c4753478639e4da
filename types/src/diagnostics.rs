//! Diagnostics, partitioned by source and by file.
//!
//! Diagnostics are stored as source → filename → list. The partitioning
//! is what makes incremental updates cheap: a single-file reparse
//! replaces exactly one bucket without disturbing diagnostics produced
//! by other sources or for other files.

use std::collections::HashMap;

use crate::dir::FileName;
use crate::op::OpState;

/// Producer of a diagnostics bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticSource {
    HclParsing,
    SchemaValidation,
    ReferenceValidation,
    ExternalValidate,
}

impl DiagnosticSource {
    /// All sources, in publication order.
    pub const ALL: [Self; 4] = [
        Self::HclParsing,
        Self::SchemaValidation,
        Self::ReferenceValidation,
        Self::ExternalValidate,
    ];

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::HclParsing => "hcl-parsing",
            Self::SchemaValidation => "schema-validation",
            Self::ReferenceValidation => "reference-validation",
            Self::ExternalValidate => "external-validate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }
}

/// A single diagnostic within one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    severity: Severity,
    message: String,
    /// 0-indexed line number.
    line: u32,
    /// 0-indexed column.
    col: u32,
}

impl Diagnostic {
    #[must_use]
    pub fn new(severity: Severity, message: impl Into<String>, line: u32, col: u32) -> Self {
        Self {
            severity,
            message: message.into(),
            line,
            col,
        }
    }

    /// Error diagnostic at the start of a file; used for file-level
    /// failures such as an unreadable file.
    #[must_use]
    pub fn file_error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message, 0, 0)
    }

    #[must_use]
    pub fn severity(&self) -> Severity {
        self.severity
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 0-indexed line number.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    /// 0-indexed column.
    #[must_use]
    pub fn col(&self) -> u32 {
        self.col
    }
}

/// Diagnostics for one source, keyed by file name.
pub type FileDiagnostics = HashMap<FileName, Vec<Diagnostic>>;

/// All diagnostics for one directory, partitioned by source.
#[derive(Debug, Clone, Default)]
pub struct SourceDiagnostics {
    by_source: HashMap<DiagnosticSource, FileDiagnostics>,
}

impl SourceDiagnostics {
    /// Replace the whole bucket for one source.
    pub fn replace(&mut self, source: DiagnosticSource, diags: FileDiagnostics) {
        self.by_source.insert(source, diags);
    }

    #[must_use]
    pub fn bucket(&self, source: DiagnosticSource) -> Option<&FileDiagnostics> {
        self.by_source.get(&source)
    }

    /// Total diagnostic count across all sources and files.
    #[must_use]
    pub fn count(&self) -> usize {
        self.by_source
            .values()
            .flat_map(HashMap::values)
            .map(Vec::len)
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (DiagnosticSource, &FileDiagnostics)> {
        self.by_source.iter().map(|(s, d)| (*s, d))
    }
}

/// Per-source progress of diagnostics production for one directory.
#[derive(Debug, Clone)]
pub struct DiagnosticSourceState {
    states: HashMap<DiagnosticSource, OpState>,
}

impl Default for DiagnosticSourceState {
    fn default() -> Self {
        let states = DiagnosticSource::ALL
            .iter()
            .map(|s| (*s, OpState::Unknown))
            .collect();
        Self { states }
    }
}

impl DiagnosticSourceState {
    #[must_use]
    pub fn get(&self, source: DiagnosticSource) -> OpState {
        self.states.get(&source).copied().unwrap_or_default()
    }

    pub fn set(&mut self, source: DiagnosticSource, state: OpState) {
        self.states.insert(source, state);
    }
}
