//! Error types for the queue scheduler.

use thiserror::Error;

/// Boxed error returned by job handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Scheduler failures.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The job store failed.
    #[error("job store database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A job handler returned an error.
    #[error("job '{job}' failed: {source}")]
    Handler {
        /// Job name.
        job: String,
        /// Handler error.
        source: HandlerError,
    },
}

impl SchedulerError {
    /// Wraps a handler failure.
    pub fn handler(job: impl Into<String>, source: HandlerError) -> Self {
        Self::Handler {
            job: job.into(),
            source,
        }
    }
}
