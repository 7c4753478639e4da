//! Directory and file identity.
//!
//! A [`DirHandle`] is the canonical identifier for a unit of analysis:
//! one configuration directory. Every record, job, and change in the
//! system is keyed by it, and equality is path equality: two handles
//! built from the same directory always compare equal regardless of how
//! the path was spelled at the call site.

use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Canonical identity for one configuration directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirHandle {
    path: PathBuf,
}

impl DirHandle {
    /// Build a handle from a directory path.
    ///
    /// The path is normalized (`.` and `..` components resolved lexically)
    /// so that differently spelled paths to the same directory produce
    /// equal handles.
    #[must_use]
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self {
            path: normalize(path.as_ref()),
        }
    }

    /// Handle for the directory containing `file_path`.
    #[must_use]
    pub fn parent_of(file_path: impl AsRef<Path>) -> Self {
        let path = file_path.as_ref();
        let parent = path.parent().unwrap_or(path);
        Self::from_path(parent)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Absolute path of a file inside this directory.
    #[must_use]
    pub fn file(&self, name: &FileName) -> PathBuf {
        self.path.join(name.as_str())
    }
}

impl fmt::Display for DirHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Lexical path normalization: resolves `.` and `..` without touching
/// the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = Vec::new();
    for c in path.components() {
        match c {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Base name of a file within its directory.
///
/// Keys every per-file map (parsed artifacts, diagnostics buckets), so a
/// single-file update can replace exactly one entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileName(String);

impl FileName {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Base name of `path`, or `None` when the path has no final component.
    #[must_use]
    pub fn of(path: &Path) -> Option<Self> {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|n| Self(n.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Editor language identifier of an opened document (e.g. `hcl`,
/// `hcl-vars`). Travels on events and decides feature relevance; it is
/// not part of record identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LanguageId(String);

impl LanguageId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LanguageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for LanguageId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for LanguageId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
