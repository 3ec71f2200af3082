//! Deterministic key derivation.
//!
//! Keys are pure functions of resolved identifiers. Changing a format here
//! orphans every cached page and every recorded no-JS permission.

use super::{ExternalTarget, VersionRef};

const CACHE_PREFIX: &str = "wr";
const SESSION_PREFIX: &str = "wrs";

/// Render-cache key for a hosted version: `wr:{versionId}`.
#[must_use]
pub fn hosted_cache_key(version_id: i64) -> String {
    format!("{CACHE_PREFIX}:{version_id}")
}

/// Render-cache key for a version's external link: `wr:ext:v:{versionId}`.
#[must_use]
pub fn external_version_cache_key(version_id: i64) -> String {
    format!("{CACHE_PREFIX}:ext:v:{version_id}")
}

/// Render-cache key for an item-level external link: `wr:ext:m:{contentId}`.
#[must_use]
pub fn external_content_cache_key(content_id: i64) -> String {
    format!("{CACHE_PREFIX}:ext:m:{content_id}")
}

/// Render-cache key for an external target.
#[must_use]
pub fn external_cache_key(target: ExternalTarget) -> String {
    match target {
        ExternalTarget::Version(version_id) => external_version_cache_key(version_id),
        ExternalTarget::Content(content_id) => external_content_cache_key(content_id),
    }
}

/// Every render-cache key a change to `(content_id, version_id)` can make stale.
#[must_use]
pub fn cache_keys_for_version(content_id: i64, version_id: i64) -> [String; 3] {
    [
        hosted_cache_key(version_id),
        external_version_cache_key(version_id),
        external_content_cache_key(content_id),
    ]
}

/// Permission/session key: `wrs:{contentId}:{h|x}:{versionRef}`.
///
/// Distinct from the cache key so a recorded permission is always tied to one
/// `(contentId, versionRef)` pair, including the source kind.
#[must_use]
pub fn session_key(content_id: i64, version_ref: VersionRef, external: bool) -> String {
    let kind = if external { "x" } else { "h" };
    format!("{SESSION_PREFIX}:{content_id}:{kind}:{version_ref}")
}
