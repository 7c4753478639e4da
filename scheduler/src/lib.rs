//! Job scheduling: the job model and the bounded worker pool.
//!
//! A [`Job`] is a unit of work targeting one directory, with dependency
//! and dedup metadata and an optional continuation. The [`Scheduler`]
//! drains a [`JobStorage`] implementation (the job store lives in
//! `strata-state`) with a fixed number of worker tasks, one scheduler
//! instance per priority class.

mod error;
mod job;
mod scheduler;
mod storage;

pub use error::SchedulerError;
pub use job::{DeferFn, Job, JobCtx, JobFn, JobId, JobIds, JobKind, JobPriority, StateProbe};
pub use scheduler::Scheduler;
pub use storage::{DispatchedJob, JobStorage};
