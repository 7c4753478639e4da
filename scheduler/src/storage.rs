//! The seam between the scheduler and the job store.

use tokio::sync::watch;

use strata_types::DirHandle;

use crate::error::SchedulerError;
use crate::job::{DeferFn, JobFn, JobId, JobIds, JobKind, JobPriority};

/// A job handed out for execution. Ownership of the executable and
/// continuation units moves to the worker; the store keeps only a
/// running-state marker.
pub struct DispatchedJob {
    pub id: JobId,
    pub dir: DirHandle,
    pub kind: JobKind,
    pub ignore_state: bool,
    pub func: JobFn,
    pub defer: Option<DeferFn>,
}

/// Storage the scheduler drains. Implemented by the job store in
/// `strata-state`.
pub trait JobStorage: Send + Sync + 'static {
    /// Blocks until a queued job of `priority` with no outstanding
    /// dependencies is available, marks it running, and hands it out.
    /// Returns [`SchedulerError::Stopped`] once `cancel` fires.
    fn await_next_job(
        &self,
        priority: JobPriority,
        cancel: watch::Receiver<bool>,
    ) -> impl Future<Output = Result<DispatchedJob, SchedulerError>> + Send;

    /// Records a job's completion: releases its dependents and registers
    /// any continuation-spawned job IDs so waiters can follow the chain.
    fn finish_job(
        &self,
        id: JobId,
        job_err: Option<&anyhow::Error>,
        deferred: JobIds,
    ) -> Result<(), SchedulerError>;
}
