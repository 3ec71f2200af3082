//! Error types for context resolution.

use thiserror::Error;

use crate::content::ContentError;
use crate::error::{ClientAction, ClientFacing};

/// Why a request could not be turned into a [`super::DownloadContext`].
///
/// Both `NotFound` and `InvalidExternalConfig` are terminal "not found"
/// outcomes for the client; `Repository` is a server-side failure.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Slug or version absent, trashed, password-protected or unauthorized.
    #[error("download target not found: {reason}")]
    NotFound {
        /// Internal description, safe to log but not shown to clients.
        reason: String,
    },

    /// External link configuration missing or malformed.
    #[error("invalid external link for content {content_id}: {reason}")]
    InvalidExternalConfig {
        /// Content item the link belongs to.
        content_id: i64,
        /// What was wrong.
        reason: String,
    },

    /// The content store failed.
    #[error(transparent)]
    Repository(#[from] ContentError),
}

impl ResolveError {
    /// Creates a not-found error.
    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::NotFound {
            reason: reason.into(),
        }
    }

    /// Creates an invalid-external-config error.
    pub fn invalid_external(content_id: i64, reason: impl Into<String>) -> Self {
        Self::InvalidExternalConfig {
            content_id,
            reason: reason.into(),
        }
    }

    /// Whether the client should see a 404.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::InvalidExternalConfig { .. })
    }
}

impl PartialEq for ResolveError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::NotFound { reason: a }, Self::NotFound { reason: b }) => a == b,
            (
                Self::InvalidExternalConfig {
                    content_id: a,
                    reason: ra,
                },
                Self::InvalidExternalConfig {
                    content_id: b,
                    reason: rb,
                },
            ) => a == b && ra == rb,
            // Store failures carry no comparable identity
            _ => false,
        }
    }
}

impl ClientFacing for ResolveError {
    fn status_code(&self) -> u16 {
        if self.is_not_found() { 404 } else { 500 }
    }

    fn client_action(&self) -> ClientAction {
        if self.is_not_found() {
            ClientAction::Stop
        } else {
            ClientAction::Retry
        }
    }
}
