//! Error types for token issuance and consumption.

use std::time::Duration;

use thiserror::Error;

use crate::error::{ClientAction, ClientFacing};

/// Token service failures.
#[derive(Debug, Error)]
pub enum TokenError {
    /// Too many issuances for this `(fingerprint, versionRef)` inside the window.
    #[error("too many token requests, retry after {}s", retry_after.as_secs())]
    RateLimited {
        /// Time until the oldest counted request leaves the window.
        retry_after: Duration,
    },

    /// A stored row could not be interpreted.
    #[error("corrupt token record: {0}")]
    CorruptRecord(String),

    /// Database failure.
    #[error("token store database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl TokenError {
    /// Creates a rate-limited error.
    #[must_use]
    pub fn rate_limited(retry_after: Duration) -> Self {
        Self::RateLimited { retry_after }
    }

    /// Whether this is a rate-limit rejection.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

impl ClientFacing for TokenError {
    fn status_code(&self) -> u16 {
        match self {
            Self::RateLimited { .. } => 429,
            Self::CorruptRecord(_) | Self::Database(_) => 500,
        }
    }

    fn client_action(&self) -> ClientAction {
        match self {
            Self::RateLimited { retry_after } => ClientAction::RetryAfter(*retry_after),
            Self::CorruptRecord(_) | Self::Database(_) => ClientAction::Retry,
        }
    }
}

/// Why a token exchange was refused. Every rejection is client-correctable
/// by restarting the countdown.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    /// Past its TTL, or never issued.
    #[error("download token expired")]
    Expired,

    /// Already exchanged once.
    #[error("download token already used")]
    AlreadyUsed,

    /// Issued for a different version.
    #[error("download token does not match the requested version")]
    Mismatched,
}

impl TokenRejection {
    /// Stable machine-readable code.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Expired => "token_expired",
            Self::AlreadyUsed => "token_already_used",
            Self::Mismatched => "token_mismatched",
        }
    }
}

impl ClientFacing for TokenRejection {
    fn status_code(&self) -> u16 {
        match self {
            Self::Expired => 410,
            Self::AlreadyUsed => 409,
            Self::Mismatched => 400,
        }
    }

    fn client_action(&self) -> ClientAction {
        ClientAction::Retry
    }
}
