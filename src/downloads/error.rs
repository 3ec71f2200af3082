//! Error types for the download-event queue.

use thiserror::Error;

/// Errors from the download-event queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Database operation failed.
    #[error("download queue database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored event could not be decoded.
    #[error("corrupt download event {id}: {reason}")]
    CorruptEvent {
        /// Event row id.
        id: i64,
        /// What was wrong with it.
        reason: String,
    },
}
