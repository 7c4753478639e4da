//! Open-document tracking.
//!
//! Watched-file handlers consult this store to skip re-analysis of
//! directories nobody is viewing; the job and change stores consult it
//! for their open-directory marks.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use strata_types::{DirHandle, FileName};

#[derive(Debug, Default)]
pub struct DocumentStore {
    open: Mutex<HashMap<DirHandle, HashSet<FileName>>>,
}

impl DocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, dir: &DirHandle, file: FileName) {
        self.open
            .lock()
            .unwrap()
            .entry(dir.clone())
            .or_default()
            .insert(file);
    }

    pub fn close(&self, dir: &DirHandle, file: &FileName) {
        let mut open = self.open.lock().unwrap();
        if let Some(files) = open.get_mut(dir) {
            files.remove(file);
            if files.is_empty() {
                open.remove(dir);
            }
        }
    }

    /// Whether the editor currently has any document of `dir` open.
    #[must_use]
    pub fn has_open_documents(&self, dir: &DirHandle) -> bool {
        self.open.lock().unwrap().contains_key(dir)
    }
}
