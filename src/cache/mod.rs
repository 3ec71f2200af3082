//! Page cache gate for waiting-room interstitials.
//!
//! Anonymous traffic is served from a key/value page cache keyed by
//! [`DownloadContext::cache_key`]; anything session-sensitive bypasses it.
//! Cached bytes are checked for personalised markup before being served.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use waiting_room::cache::{CacheGate, CachePolicy, GateRequest, MemoryCacheStore, Renderer};
//! use waiting_room::clock::{Clock, SystemClock};
//! # use waiting_room::context::DownloadContext;
//!
//! # async fn example(renderer: Arc<dyn Renderer>, context: DownloadContext) -> Result<(), Box<dyn std::error::Error>> {
//! let clock: Arc<dyn Clock> = Arc::new(SystemClock);
//! let gate = CacheGate::new(
//!     Arc::new(MemoryCacheStore::new(Arc::clone(&clock))),
//!     renderer,
//!     clock,
//!     CachePolicy::default(),
//! );
//! let response = gate
//!     .serve(&context, &GateRequest::anonymous("/mods/neon-drift/download/"))
//!     .await?;
//! println!("{:?}", response.state);
//! # Ok(())
//! # }
//! ```

mod error;
mod gate;
mod store;

pub use error::{CacheError, RenderError};
pub use gate::{CACHE_STATE_HEADER, CacheGate, CachePolicy, GateRequest, GateResponse};
pub use store::{CacheStore, MemoryCacheStore, SqliteCacheStore};

use std::fmt;

use async_trait::async_trait;
use reqwest::header::HeaderValue;
use serde::Serialize;

use crate::context::DownloadContext;

/// How a response body was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheState {
    /// Served from the page cache.
    Hit,
    /// Rendered and stored.
    Miss,
    /// Rendered (or refused) without touching the cache.
    Bypass,
}

impl CacheState {
    /// Diagnostic label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Bypass => "BYPASS",
        }
    }

    fn header_value(self) -> HeaderValue {
        HeaderValue::from_static(self.as_str())
    }
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rendering collaborator: produces the interstitial for a context.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Renders the waiting room page.
    async fn render(&self, context: &DownloadContext) -> Result<Vec<u8>, RenderError>;
}
