//! User-Agent string for outbound edge-cache API calls.

/// Project URL advertised to the cache provider.
const PROJECT_UA_URL: &str = "https://github.com/fierce/waiting-room";

/// Default User-Agent for purge requests.
#[must_use]
pub(crate) fn default_purge_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("waiting-room/{version} (edge-purge; +{PROJECT_UA_URL})")
}
