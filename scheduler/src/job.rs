//! The job model.

use std::fmt;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::watch;

use strata_types::{DirHandle, OpState};

/// Identity of a scheduled job. Assigned monotonically by the job store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    #[must_use]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type JobIds = Vec<JobId>;

/// Operation-type tag of a job (e.g. `modules.parse`). Along with the
/// target directory it identifies the pipeline stage a job advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobKind(&'static str);

impl JobKind {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Priority class of a job. Each scheduler instance drains exactly one
/// class, so a low-priority job can never starve high-priority work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum JobPriority {
    Low,
    #[default]
    High,
}

/// Execution context handed to a job's executable and continuation
/// units.
#[derive(Debug, Clone)]
pub struct JobCtx {
    ignore_state: bool,
    cancel: watch::Receiver<bool>,
    job_id: Option<JobId>,
}

impl JobCtx {
    #[must_use]
    pub fn new(ignore_state: bool, cancel: watch::Receiver<bool>) -> Self {
        Self {
            ignore_state,
            cancel,
            job_id: None,
        }
    }

    /// Stamp the identity of the job this context belongs to. Done by
    /// the scheduler before invoking the executable unit, so a
    /// continuation can make newly spawned jobs depend on its own job.
    #[must_use]
    pub fn with_job_id(mut self, id: JobId) -> Self {
        self.job_id = Some(id);
        self
    }

    #[must_use]
    pub fn job_id(&self) -> Option<JobId> {
        self.job_id
    }

    /// Whether this job was enqueued with the dedup-bypass flag; stage
    /// code uses it to decide between incremental and full work.
    #[must_use]
    pub fn ignore_state(&self) -> bool {
        self.ignore_state
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves when the scheduler is stopped. Long-running units select
    /// against this to return promptly on cancellation.
    pub async fn cancelled(&mut self) {
        while !*self.cancel.borrow() {
            if self.cancel.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Type-erased executable unit.
pub type JobFn = Box<dyn FnOnce(JobCtx) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Continuation unit: runs exactly once after the executable unit
/// returns, receives its error, and may enqueue further jobs, returning
/// their identities so callers can wait for the whole chain. The error
/// is only borrowed for the synchronous part of the call; the returned
/// future must own whatever it needs.
pub type DeferFn = Box<
    dyn FnOnce(JobCtx, Option<&anyhow::Error>) -> BoxFuture<'static, anyhow::Result<JobIds>>
        + Send,
>;

/// Reads the current [`OpState`] of the stage a job is meant to advance.
/// Consulted at enqueue time for deduplication.
pub type StateProbe = Box<dyn FnOnce() -> OpState + Send>;

/// A unit of work with dependency and dedup metadata.
pub struct Job {
    /// Directory the job belongs to; used for dedup (along with `kind`)
    /// and for directory-scoped dequeueing.
    pub dir: DirHandle,
    pub kind: JobKind,
    pub priority: JobPriority,
    /// Jobs that must finish (successfully or not) before this one may
    /// start. Ordering only; a dependency's failure does not gate this
    /// job.
    pub depends_on: JobIds,
    /// Dedup bypass: enqueue and run even when the probed state is past
    /// `Unknown`.
    pub ignore_state: bool,
    pub func: JobFn,
    pub defer: Option<DeferFn>,
    /// Dedup probe for the stage this job advances. Jobs without a probe
    /// are never deduplicated.
    pub probe: Option<StateProbe>,
}

impl Job {
    pub fn new<F, Fut>(dir: DirHandle, kind: JobKind, func: F) -> Self
    where
        F: FnOnce(JobCtx) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            dir,
            kind,
            priority: JobPriority::default(),
            depends_on: JobIds::new(),
            ignore_state: false,
            func: Box::new(move |ctx| func(ctx).boxed()),
            defer: None,
            probe: None,
        }
    }

    #[must_use]
    pub fn depends_on(mut self, ids: JobIds) -> Self {
        self.depends_on = ids;
        self
    }

    #[must_use]
    pub fn ignore_state(mut self, ignore: bool) -> Self {
        self.ignore_state = ignore;
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Attach a continuation unit.
    #[must_use]
    pub fn defer<F>(mut self, f: F) -> Self
    where
        F: FnOnce(JobCtx, Option<&anyhow::Error>) -> BoxFuture<'static, anyhow::Result<JobIds>>
            + Send
            + 'static,
    {
        self.defer = Some(Box::new(f));
        self
    }

    /// Attach the dedup probe for the stage this job advances.
    #[must_use]
    pub fn probe<F>(mut self, f: F) -> Self
    where
        F: FnOnce() -> OpState + Send + 'static,
    {
        self.probe = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("dir", &self.dir)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("depends_on", &self.depends_on)
            .field("ignore_state", &self.ignore_state)
            .finish_non_exhaustive()
    }
}
