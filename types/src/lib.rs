//! Core domain types shared by every Strata crate.
//!
//! Everything here is plain data: directory identity, per-stage progress
//! markers, diagnostics, change flags, and the analysis payloads the
//! decoder produces. No IO, no async.

pub mod analysis;
pub mod change;
pub mod diagnostics;
pub mod dir;
pub mod op;
pub mod options;

pub use analysis::{AstHandle, DeclKind, Metadata, ReferenceOrigin, ReferenceTarget};
pub use change::Changes;
pub use diagnostics::{
    Diagnostic, DiagnosticSource, DiagnosticSourceState, FileDiagnostics, Severity,
    SourceDiagnostics,
};
pub use dir::{DirHandle, FileName, LanguageId};
pub use op::OpState;
pub use options::Options;
