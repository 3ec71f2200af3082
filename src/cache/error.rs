//! Error types for the page cache and rendering collaborator.

use reqwest::header::InvalidHeaderValue;
use thiserror::Error;

use crate::error::{ClientAction, ClientFacing};

/// Page-cache storage and response-building failures.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache table could not be read or written.
    #[error("page cache database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A computed header value contained invalid characters.
    #[error("invalid response header value: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),
}

/// Rendering collaborator failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// The renderer reported an error.
    #[error("render failed: {0}")]
    Failed(String),

    /// The renderer returned no bytes.
    #[error("render produced empty output")]
    Empty,
}

impl RenderError {
    /// Creates a failure with a message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl ClientFacing for RenderError {
    fn status_code(&self) -> u16 {
        500
    }

    fn client_action(&self) -> ClientAction {
        ClientAction::Retry
    }
}
