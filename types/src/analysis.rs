//! Payloads produced by the decoder: parsed-file handles, extracted
//! metadata, and reference data.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::dir::FileName;

/// Opaque handle to one parsed file's AST.
///
/// Produced and consumed only by the decoder; the core treats it as an
/// immutable token whose identity (pointer equality) proves a file was
/// not reparsed.
pub type AstHandle = Arc<dyn Any + Send + Sync>;

/// Kind of a declared entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Variable,
    Output,
    Block,
}

/// Version-independent metadata extracted from a directory's parsed
/// files; enough to pick a schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    /// Declared core version constraint, if any (e.g. `>= 1.2`).
    pub core_requirements: Option<String>,
    /// Declared entities, keyed by name.
    pub declarations: BTreeMap<String, DeclKind>,
    /// Files the metadata was extracted from.
    pub filenames: Vec<FileName>,
}

/// A referenceable address declared somewhere in a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceTarget {
    pub address: String,
    pub file: FileName,
    /// 0-indexed line of the declaration.
    pub line: u32,
}

/// A use of an address somewhere in a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceOrigin {
    pub address: String,
    pub file: FileName,
    /// 0-indexed line of the use.
    pub line: u32,
}
