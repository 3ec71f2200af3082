//! Context resolution: from an inbound identifier to a [`DownloadContext`].
//!
//! A context is built once per request, threaded through the cache gate and
//! token service, and dropped at the end of the request. It is never cached
//! process-wide; resolving is cheap and deterministic.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use waiting_room::Database;
//! use waiting_room::content::{SqliteContentStore, Viewer};
//! use waiting_room::context::{ContextResolver, ResolveRequest, SiteUrls};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new_in_memory().await?;
//! let resolver = ContextResolver::new(
//!     Arc::new(SqliteContentStore::new(db)),
//!     SiteUrls::new("https://mods.example")?,
//! );
//! let context = resolver
//!     .resolve(&ResolveRequest::latest("neon-drift"), &Viewer::Anonymous)
//!     .await?;
//! println!("{}", context.cache_key());
//! # Ok(())
//! # }
//! ```

mod error;
pub mod keys;
mod resolver;
mod urls;

pub use error::ResolveError;
pub use resolver::ContextResolver;
pub use urls::{SiteUrls, paths_match, url_path};

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Which version a context (or token) is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionRef {
    /// A concrete version record.
    Id(i64),
    /// Whatever the item currently offers; used for item-level external links.
    Latest,
}

impl VersionRef {
    /// Concrete version id, if any.
    #[must_use]
    pub fn id(self) -> Option<i64> {
        match self {
            Self::Id(id) => Some(id),
            Self::Latest => None,
        }
    }
}

impl fmt::Display for VersionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Latest => f.write_str("latest"),
        }
    }
}

impl FromStr for VersionRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "latest" {
            return Ok(Self::Latest);
        }
        s.parse::<i64>()
            .ok()
            .filter(|id| *id > 0)
            .map(Self::Id)
            .ok_or_else(|| format!("invalid version reference: {s}"))
    }
}

/// Hosted file or third-party link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Locally stored artifact.
    Hosted,
    /// Third-party URL.
    External,
}

/// Which record an external link came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum ExternalTarget {
    /// A version record's own link payload.
    Version(i64),
    /// The content item's link configuration.
    Content(i64),
}

/// External-link marker from the request layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalType {
    /// Not an external-link request.
    #[default]
    None,
    /// Link attached to a version; target is the version id.
    Version,
    /// Item-level link; target is the content id.
    Mod,
}

impl FromStr for ExternalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "none" => Ok(Self::None),
            "version" | "v" => Ok(Self::Version),
            "mod" | "m" => Ok(Self::Mod),
            _ => Err(format!("invalid external type: {s}")),
        }
    }
}

/// Parsed resolution inputs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolveRequest {
    /// Content slug.
    pub slug: String,
    /// Explicit version, if any.
    pub version_id: Option<i64>,
    /// External-link marker.
    pub external_type: ExternalType,
    /// External target id (version id or content id).
    pub external_target: Option<i64>,
}

impl ResolveRequest {
    /// Latest version of `slug`.
    #[must_use]
    pub fn latest(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            ..Self::default()
        }
    }

    /// A specific version of `slug`.
    #[must_use]
    pub fn version(slug: impl Into<String>, version_id: i64) -> Self {
        Self {
            slug: slug.into(),
            version_id: Some(version_id),
            ..Self::default()
        }
    }

    /// An external-link request.
    #[must_use]
    pub fn external(slug: impl Into<String>, external_type: ExternalType, target: Option<i64>) -> Self {
        Self {
            slug: slug.into(),
            external_type,
            external_target: target,
            ..Self::default()
        }
    }

    /// Builds a request from raw request-layer values where `0` means "absent".
    #[must_use]
    pub fn from_raw(slug: &str, version_id: u64, external_type: ExternalType, external_target: u64) -> Self {
        let non_zero = |raw: u64| i64::try_from(raw).ok().filter(|id| *id > 0);
        Self {
            slug: slug.to_string(),
            version_id: non_zero(version_id),
            external_type,
            external_target: non_zero(external_target),
        }
    }
}

/// External-source details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalSource {
    /// Record the link came from.
    pub target: ExternalTarget,
    /// Validated target URL.
    pub url: String,
    /// Host with a leading `www.` removed.
    pub domain: String,
    /// Advertised label.
    pub label: Option<String>,
    /// Advertised size text.
    pub size: Option<String>,
}

/// Hosted-source details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostedSource {
    /// Version being downloaded.
    pub version_id: i64,
    /// Media-store attachment.
    pub attachment_id: i64,
    /// Stored file name.
    pub file_name: Option<String>,
    /// Stored size in bytes.
    pub file_size: Option<i64>,
}

/// What is being downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DownloadSource {
    /// Locally stored file.
    Hosted(HostedSource),
    /// Third-party link.
    External(ExternalSource),
}

/// A fully resolved, valid download target.
///
/// Only [`ContextResolver`] constructs these, so every instance has its
/// content item, version reference and keys resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadContext {
    content_id: i64,
    slug: String,
    title: String,
    version_ref: VersionRef,
    version_number: Option<String>,
    source: DownloadSource,
    cache_key: String,
    session_key: String,
    canonical_url: String,
}

impl DownloadContext {
    /// Parent content item.
    #[must_use]
    pub fn content_id(&self) -> i64 {
        self.content_id
    }

    /// Parent content slug.
    #[must_use]
    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Parent content title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Resolved version reference.
    #[must_use]
    pub fn version_ref(&self) -> VersionRef {
        self.version_ref
    }

    /// Display version number when a concrete version is involved.
    #[must_use]
    pub fn version_number(&self) -> Option<&str> {
        self.version_number.as_deref()
    }

    /// Source details.
    #[must_use]
    pub fn source(&self) -> &DownloadSource {
        &self.source
    }

    /// Hosted or external.
    #[must_use]
    pub fn source_kind(&self) -> SourceKind {
        match self.source {
            DownloadSource::Hosted(_) => SourceKind::Hosted,
            DownloadSource::External(_) => SourceKind::External,
        }
    }

    /// External URL, for external contexts.
    #[must_use]
    pub fn external_url(&self) -> Option<&str> {
        match &self.source {
            DownloadSource::External(external) => Some(&external.url),
            DownloadSource::Hosted(_) => None,
        }
    }

    /// External domain, for external contexts.
    #[must_use]
    pub fn external_domain(&self) -> Option<&str> {
        match &self.source {
            DownloadSource::External(external) => Some(&external.domain),
            DownloadSource::Hosted(_) => None,
        }
    }

    /// Render-cache key.
    #[must_use]
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    /// Permission/session key.
    #[must_use]
    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    /// Public URL of this waiting room.
    #[must_use]
    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_ref_display_and_parse() {
        assert_eq!(VersionRef::Id(42).to_string(), "42");
        assert_eq!(VersionRef::Latest.to_string(), "latest");
        assert_eq!("42".parse(), Ok(VersionRef::Id(42)));
        assert_eq!("latest".parse(), Ok(VersionRef::Latest));
        assert!("0".parse::<VersionRef>().is_err());
        assert!("-1".parse::<VersionRef>().is_err());
        assert!("abc".parse::<VersionRef>().is_err());
    }

    #[test]
    fn test_external_type_parses_short_and_long_labels() {
        assert_eq!("mod".parse(), Ok(ExternalType::Mod));
        assert_eq!("v".parse(), Ok(ExternalType::Version));
        assert_eq!("".parse(), Ok(ExternalType::None));
        assert!("other".parse::<ExternalType>().is_err());
    }

    #[test]
    fn test_resolve_request_from_raw_treats_zero_as_absent() {
        let request = ResolveRequest::from_raw("neon-drift", 0, ExternalType::Mod, 0);
        assert_eq!(request.version_id, None);
        assert_eq!(request.external_target, None);

        let request = ResolveRequest::from_raw("neon-drift", 42, ExternalType::None, 0);
        assert_eq!(request.version_id, Some(42));
    }
}
