//! Coarse change flags queued per directory.
//!
//! A [`Changes`] value is a has-something-changed signal, not a
//! structural diff. It is cheap to compute on every store mutation and
//! sufficient for the notification layer to decide what to re-publish.

/// Flag set describing what changed for one directory.
///
/// Merging is an idempotent union: a flag that became `true` never flips
/// back within the same batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Changes {
    /// The directory's record was removed entirely.
    pub is_removal: bool,
    pub diagnostics: bool,
    pub reference_origins: bool,
    pub core_requirements: bool,
}

impl Changes {
    /// Flag set for a record removal.
    #[must_use]
    pub fn removal() -> Self {
        Self {
            is_removal: true,
            ..Self::default()
        }
    }

    /// Union of both flag sets.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            is_removal: self.is_removal || other.is_removal,
            diagnostics: self.diagnostics || other.diagnostics,
            reference_origins: self.reference_origins || other.reference_origins,
            core_requirements: self.core_requirements || other.core_requirements,
        }
    }

    #[must_use]
    pub fn any(self) -> bool {
        self != Self::default()
    }
}
