//! Store errors.

use thiserror::Error;

use strata_types::DirHandle;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("record for {0} already exists")]
    AlreadyExists(DirHandle),

    #[error("record for {0} not found")]
    RecordNotFound(DirHandle),

    /// A bounded readiness wait expired before the watched condition
    /// held.
    #[error("timed out waiting on record for {0}")]
    WatchTimeout(DirHandle),

    /// The store's cancellation signal fired while waiting.
    #[error("state store stopped")]
    Stopped,
}

impl StateError {
    #[must_use]
    pub fn is_record_not_found(&self) -> bool {
        matches!(self, Self::RecordNotFound(_))
    }
}
