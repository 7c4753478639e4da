//! Per-stage progress markers.

use std::fmt;

/// Progress of one pipeline stage for one directory.
///
/// Transitions are monotonic (`Unknown` → `Queued` → `Loading` →
/// `Loaded`) unless a dedup-bypass request explicitly resets the stage
/// back to `Queued`. The state always advances past `Loading`, even when
/// the stage fails, so no stage can get stuck retrying nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum OpState {
    #[default]
    Unknown,
    Queued,
    Loading,
    Loaded,
}

impl OpState {
    #[must_use]
    pub fn is_loaded(self) -> bool {
        self == Self::Loaded
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Queued => "queued",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
        }
    }
}

impl fmt::Display for OpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
