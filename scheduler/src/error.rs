//! Scheduler and job-store errors.

use thiserror::Error;

use strata_types::DirHandle;

use crate::job::JobId;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Sentinel, not a failure: the stage this job would advance is
    /// already done or in flight. Callers absorb it; it must never be
    /// surfaced to the user.
    #[error("state not changed for {dir}")]
    StateNotChanged { dir: DirHandle },

    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("job {0} is already running")]
    JobAlreadyRunning(JobId),

    /// The scheduler's cancellation signal fired.
    #[error("scheduler stopped")]
    Stopped,
}

impl SchedulerError {
    #[must_use]
    pub fn is_state_not_changed(&self) -> bool {
        matches!(self, Self::StateNotChanged { .. })
    }
}
