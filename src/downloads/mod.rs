//! Durable download-event queue and the recurring drain job.
//!
//! Every authorized transfer, whether through a token or a no-JS
//! permission, appends one row to `download_events`. The drain job, run by
//! the [`crate::scheduler::QueueScheduler`], folds those rows into
//! per-version counters and removes expired token-side state.

mod drain;
mod error;
mod queue;

pub use drain::{DRAIN_JOB_NAME, DownloadQueueDrain};
pub use error::QueueError;
pub use queue::{DownloadQueue, DrainStats};

use std::fmt;

use serde::Serialize;

/// How a transfer was authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadChannel {
    /// Exchanged a countdown token.
    Token,
    /// Redeemed a no-JavaScript permission.
    NoJs,
}

impl DownloadChannel {
    /// Stored string form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::NoJs => "no_js",
        }
    }
}

impl fmt::Display for DownloadChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
