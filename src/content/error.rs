//! Error types for content store reads.

use thiserror::Error;

/// Failures reading from the content store.
#[derive(Debug, Error)]
pub enum ContentError {
    /// The underlying database query failed.
    #[error("content store query failed: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be mapped to a domain record.
    #[error("corrupt {table} row {id}: {reason}")]
    CorruptRecord {
        /// Table the row came from.
        table: &'static str,
        /// Row identifier.
        id: i64,
        /// What was wrong with it.
        reason: String,
    },
}

impl ContentError {
    /// Creates a corrupt-record error.
    pub fn corrupt(table: &'static str, id: i64, reason: impl Into<String>) -> Self {
        Self::CorruptRecord {
            table,
            id,
            reason: reason.into(),
        }
    }
}
