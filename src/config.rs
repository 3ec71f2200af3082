//! Runtime settings for the waiting room.
//!
//! [`Settings`] is plain data with defaults matching production behaviour.
//! The binary fills it from a config file and CLI flags; library users can
//! construct it directly. Call [`Settings::validate`] before wiring services.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Render-cache entry lifetime (1 hour).
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
/// `max-age` sent to browsers for cacheable pages (1 hour).
pub const DEFAULT_BROWSER_MAX_AGE_SECS: u64 = 3600;
/// `s-maxage` sent to the edge cache for cacheable pages (1 day).
pub const DEFAULT_EDGE_MAX_AGE_SECS: u64 = 86_400;
/// Download token lifetime.
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 60;
/// Lifetime of a no-JS pass-through permission.
pub const DEFAULT_PERMISSION_TTL_SECS: u64 = 900;
/// Timeout for one edge purge request.
pub const DEFAULT_PURGE_TIMEOUT_SECS: u64 = 12;
/// Cadence of the download-queue drain job.
pub const DEFAULT_DRAIN_INTERVAL_SECS: u64 = 60;
/// Download events folded per drain batch.
pub const DEFAULT_DRAIN_BATCH_SIZE: u32 = 500;

/// Markup fragments that only ever appear in personalised pages.
pub const DEFAULT_POISON_MARKERS: [&str; 3] =
    ["id=\"wpadminbar\"", "data-logged-in=\"true\"", "class=\"account-menu\""];

/// Configuration validation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A numeric value is outside its accepted range.
    #[error("invalid value for `{field}`: {value}. Expected range: {min}..={max}")]
    OutOfRange {
        /// Setting name.
        field: &'static str,
        /// Rejected value.
        value: u64,
        /// Inclusive minimum.
        min: u64,
        /// Inclusive maximum.
        max: u64,
    },

    /// A URL setting does not parse or is not http(s).
    #[error("invalid URL for `{field}`: {value}")]
    InvalidUrl {
        /// Setting name.
        field: &'static str,
        /// Rejected value.
        value: String,
    },

    /// Unknown security mode label.
    #[error("invalid security mode '{0}': expected 'strict' or 'reduced'")]
    InvalidSecurityMode(String),
}

/// Anti-abuse strictness for token issuance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    /// Fingerprint by network origin and browser signal; tight limits.
    #[default]
    Strict,
    /// Fingerprint by network origin only; looser limits for shared networks.
    Reduced,
}

impl SecurityMode {
    /// Returns the stable string label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Reduced => "reduced",
        }
    }

    /// Rate-limit policy applied to token issuance under this mode.
    #[must_use]
    pub fn policy(self) -> RateLimitPolicy {
        match self {
            Self::Strict => RateLimitPolicy {
                window: Duration::from_secs(300),
                max_requests: 3,
            },
            Self::Reduced => RateLimitPolicy {
                window: Duration::from_secs(300),
                max_requests: 10,
            },
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "reduced" => Ok(Self::Reduced),
            _ => Err(ConfigError::InvalidSecurityMode(s.to_string())),
        }
    }
}

/// Rolling-window issuance limit per `(fingerprint, versionRef)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Length of the rolling window.
    pub window: Duration,
    /// Issuances allowed inside one window; the next one is rejected.
    pub max_requests: u32,
}

/// Waiting-room settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Public site origin used to build canonical URLs.
    pub base_url: String,
    /// SQLite database file.
    pub database_path: PathBuf,
    /// Token anti-abuse mode.
    pub security_mode: SecurityMode,
    /// Render-cache TTL in seconds.
    pub cache_ttl_secs: u64,
    /// Browser `max-age` for cacheable pages.
    pub browser_max_age_secs: u64,
    /// Edge `s-maxage` for cacheable pages.
    pub edge_max_age_secs: u64,
    /// Token TTL in seconds.
    pub token_ttl_secs: u64,
    /// No-JS permission TTL in seconds.
    pub permission_ttl_secs: u64,
    /// Edge purge API endpoint; purging is disabled when unset.
    pub purge_endpoint: Option<String>,
    /// Bearer credential for the purge API.
    pub purge_api_token: Option<String>,
    /// Per-request purge timeout in seconds.
    pub purge_timeout_secs: u64,
    /// Drain job interval in seconds.
    pub drain_interval_secs: u64,
    /// Events claimed per drain batch.
    pub drain_batch_size: u32,
    /// Fragments whose presence marks a cached page as poisoned.
    pub poison_markers: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            database_path: PathBuf::from("waiting-room.db"),
            security_mode: SecurityMode::default(),
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            browser_max_age_secs: DEFAULT_BROWSER_MAX_AGE_SECS,
            edge_max_age_secs: DEFAULT_EDGE_MAX_AGE_SECS,
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            permission_ttl_secs: DEFAULT_PERMISSION_TTL_SECS,
            purge_endpoint: None,
            purge_api_token: None,
            purge_timeout_secs: DEFAULT_PURGE_TIMEOUT_SECS,
            drain_interval_secs: DEFAULT_DRAIN_INTERVAL_SECS,
            drain_batch_size: DEFAULT_DRAIN_BATCH_SIZE,
            poison_markers: DEFAULT_POISON_MARKERS
                .iter()
                .map(|marker| (*marker).to_string())
                .collect(),
        }
    }
}

impl Settings {
    /// Validates ranges and URLs.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_http_url("base_url", &self.base_url)?;
        if let Some(endpoint) = &self.purge_endpoint {
            validate_http_url("purge_endpoint", endpoint)?;
        }
        validate_range("cache_ttl_secs", self.cache_ttl_secs, 1, 86_400)?;
        validate_range("browser_max_age_secs", self.browser_max_age_secs, 0, 31_536_000)?;
        validate_range("edge_max_age_secs", self.edge_max_age_secs, 0, 31_536_000)?;
        validate_range("token_ttl_secs", self.token_ttl_secs, 1, 86_400)?;
        validate_range("permission_ttl_secs", self.permission_ttl_secs, 1, 86_400)?;
        validate_range("purge_timeout_secs", self.purge_timeout_secs, 1, 60)?;
        validate_range("drain_interval_secs", self.drain_interval_secs, 1, 86_400)?;
        validate_range(
            "drain_batch_size",
            u64::from(self.drain_batch_size),
            1,
            10_000,
        )?;
        Ok(())
    }

    /// Render-cache TTL.
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Token TTL.
    #[must_use]
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    /// No-JS permission TTL.
    #[must_use]
    pub fn permission_ttl(&self) -> Duration {
        Duration::from_secs(self.permission_ttl_secs)
    }

    /// Edge purge request timeout.
    #[must_use]
    pub fn purge_timeout(&self) -> Duration {
        Duration::from_secs(self.purge_timeout_secs)
    }

    /// Drain job interval.
    #[must_use]
    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }
}

fn validate_range(field: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

fn validate_http_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => Ok(()),
        _ => Err(ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
        }),
    }
}
