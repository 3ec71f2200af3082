//! Client fingerprints for rate limiting.
//!
//! A fingerprint is a SHA-256 digest of request-identifying signals, so no raw
//! address or user agent is ever stored.

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::SecurityMode;

/// Request-identifying signals, as seen by the request layer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientSignals {
    /// Network origin (client IP after proxy resolution).
    pub network_origin: String,
    /// Browser signal, typically the `User-Agent` header.
    pub user_agent: Option<String>,
}

impl ClientSignals {
    /// Signals from an address and optional user agent.
    pub fn new(network_origin: impl Into<String>, user_agent: Option<&str>) -> Self {
        Self {
            network_origin: network_origin.into(),
            user_agent: user_agent.map(str::to_string),
        }
    }
}

/// Hashed client identity used for rate-limit and permission buckets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derives the fingerprint for `signals` under `mode`.
    ///
    /// Strict mode mixes in the browser signal; reduced mode uses the network
    /// origin alone so clients behind one shared address share a bucket.
    #[must_use]
    pub fn derive(mode: SecurityMode, signals: &ClientSignals) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(mode.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(signals.network_origin.trim().as_bytes());
        if mode == SecurityMode::Strict {
            hasher.update(b"\0");
            hasher.update(signals.user_agent.as_deref().unwrap_or_default().as_bytes());
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Full hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short())
    }
}
