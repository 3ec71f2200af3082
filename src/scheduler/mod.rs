//! Durable, idempotent scheduling of recurring jobs.
//!
//! Registration is keyed by job name: asking for the same job twice, from
//! the same process or from every instance in a fleet, leaves exactly one
//! persisted row. Runs are guarded by a lease in the job store, so at most
//! one instance executes a job at a time and a run still in flight makes
//! the next tick skip it.

mod error;
mod runner;
mod store;

pub use error::{HandlerError, SchedulerError};
pub use runner::{DEFAULT_LEASE, DEFAULT_TICK, QueueScheduler};
pub use store::{JobLease, JobStore, NullJobStore, ScheduledJob, SqliteJobStore};

use std::fmt;

use async_trait::async_trait;

/// Work executed on each due run of a job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Runs the job once.
    async fn run(&self) -> Result<(), HandlerError>;
}

/// Result of [`QueueScheduler::ensure_scheduled`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// The job was newly persisted.
    Scheduled,
    /// The job already existed; nothing was duplicated.
    AlreadyScheduled,
    /// No durable backend is available; nothing was scheduled.
    NoDurableBackend,
}

impl ScheduleOutcome {
    /// Stable string form, used in CLI output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::AlreadyScheduled => "already_scheduled",
            Self::NoDurableBackend => "no_durable_backend",
        }
    }
}

impl fmt::Display for ScheduleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
