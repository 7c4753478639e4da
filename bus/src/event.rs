//! Event payloads for the lifecycle topics.

use std::path::PathBuf;

use strata_types::{DirHandle, FileName, LanguageId};

/// A directory walk found candidate files in `dir`.
#[derive(Debug, Clone)]
pub struct DiscoverEvent {
    pub dir: DirHandle,
    /// File names found directly in the directory.
    pub files: Vec<FileName>,
}

/// The editor opened a document.
#[derive(Debug, Clone)]
pub struct DidOpenEvent {
    pub dir: DirHandle,
    pub file: FileName,
    pub language_id: LanguageId,
}

/// The editor changed a document's content.
#[derive(Debug, Clone)]
pub struct DidChangeEvent {
    pub dir: DirHandle,
    pub file: FileName,
    pub language_id: LanguageId,
}

/// Kind of a watched-file notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeType {
    Created,
    Changed,
    Deleted,
}

/// A filesystem-level notification. For deletions the path may name a
/// file or a directory and the watcher cannot always tell which;
/// subscribers resolve the ambiguity against their own records.
#[derive(Debug, Clone)]
pub struct DidChangeWatchedEvent {
    pub path: PathBuf,
    pub change_type: FileChangeType,
    /// Whether the watcher knows the path to be a directory.
    pub is_dir: bool,
}
