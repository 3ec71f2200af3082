//! Error types for purge propagation.
//!
//! None of these reach the caller that triggered a content change; the worker
//! logs them and moves on.

use std::time::Duration;

use thiserror::Error;

use crate::content::ContentError;

/// Purge planning and edge-API failures.
#[derive(Debug, Error)]
pub enum PurgeError {
    /// The content store could not resolve the changed record.
    #[error("failed to plan purge: {0}")]
    Plan(#[from] ContentError),

    /// The HTTP client could not be built or the request failed in transport.
    #[error("edge purge request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("edge purge returned HTTP {status}")]
    Status {
        /// Response status code.
        status: u16,
    },

    /// The provider answered 2xx but reported failure in the body.
    #[error("edge purge rejected: {0}")]
    Rejected(String),

    /// No answer within the purge timeout.
    #[error("edge purge timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}
