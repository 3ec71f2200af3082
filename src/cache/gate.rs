//! The HIT / MISS / BYPASS state machine.

use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use reqwest::StatusCode;
use reqwest::header::{CACHE_CONTROL, EXPIRES, HeaderMap, HeaderName, HeaderValue, LOCATION};
use tracing::{debug, instrument, warn};

use super::{CacheError, CacheState, CacheStore, RenderError, Renderer};
use crate::clock::Clock;
use crate::config::Settings;
use crate::content::Viewer;
use crate::context::{DownloadContext, SourceKind, paths_match, url_path};

/// Diagnostic response header carrying the [`CacheState`].
pub const CACHE_STATE_HEADER: HeaderName = HeaderName::from_static("x-waiting-room-cache");

const NO_STORE: &str = "private, no-store, no-cache, must-revalidate";

/// TTLs and integrity rules applied by the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    /// Lifetime of a stored render.
    pub ttl: Duration,
    /// `max-age` for browsers.
    pub browser_max_age: Duration,
    /// `s-maxage` for the edge cache.
    pub edge_max_age: Duration,
    /// Fragments that must never appear in a public page.
    pub poison_markers: Vec<String>,
}

impl CachePolicy {
    /// Builds the policy from runtime settings.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            ttl: settings.cache_ttl(),
            browser_max_age: Duration::from_secs(settings.browser_max_age_secs),
            edge_max_age: Duration::from_secs(settings.edge_max_age_secs),
            poison_markers: settings.poison_markers.clone(),
        }
    }

    /// `Cache-Control` value for HIT and MISS responses.
    #[must_use]
    pub fn public_cache_control(&self) -> String {
        format!(
            "public, max-age={}, s-maxage={}",
            self.browser_max_age.as_secs(),
            self.edge_max_age.as_secs()
        )
    }

    /// Whether `body` contains any poison marker.
    #[must_use]
    pub fn is_poisoned(&self, body: &[u8]) -> bool {
        self.poison_markers
            .iter()
            .filter(|marker| !marker.is_empty())
            .any(|marker| contains(body, marker.as_bytes()))
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

/// The request-side facts the gate needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateRequest {
    /// Inbound request path (or absolute URL).
    pub path: String,
    /// Who is asking.
    pub viewer: Viewer,
    /// A session cookie or similar marker was present even if no user resolved.
    pub session_indicator: bool,
}

impl GateRequest {
    /// Request for `path` by `viewer`.
    pub fn new(path: impl Into<String>, viewer: Viewer) -> Self {
        Self {
            path: path.into(),
            viewer,
            session_indicator: false,
        }
    }

    /// Anonymous request for `path`.
    pub fn anonymous(path: impl Into<String>) -> Self {
        Self::new(path, Viewer::Anonymous)
    }

    /// Marks the request as carrying a session indicator.
    #[must_use]
    pub fn with_session_indicator(mut self) -> Self {
        self.session_indicator = true;
        self
    }

    /// Whether the response may contain personalised markup.
    #[must_use]
    pub fn is_privileged(&self) -> bool {
        self.viewer.is_privileged() || self.session_indicator
    }
}

/// What the request layer should send back.
#[derive(Debug, Clone)]
pub struct GateResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// Caching and diagnostic headers.
    pub headers: HeaderMap,
    /// Page bytes; empty for redirects and errors.
    pub body: Vec<u8>,
    /// How the body was obtained.
    pub state: CacheState,
}

impl GateResponse {
    /// Uncacheable 404, used for every failed resolution.
    #[must_use]
    pub fn not_found() -> Self {
        Self::uncacheable(StatusCode::NOT_FOUND, Vec::new())
    }

    /// Uncacheable 500, used when the page cannot be produced.
    #[must_use]
    pub fn server_error() -> Self {
        Self::uncacheable(StatusCode::INTERNAL_SERVER_ERROR, Vec::new())
    }

    fn uncacheable(status: StatusCode, body: Vec<u8>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
        headers.insert(CACHE_STATE_HEADER, CacheState::Bypass.header_value());
        Self {
            status,
            headers,
            body,
            state: CacheState::Bypass,
        }
    }

    /// Whether this is a canonical redirect.
    #[must_use]
    pub fn is_redirect(&self) -> bool {
        self.status == StatusCode::MOVED_PERMANENTLY
    }

    /// `Location` header, for redirects.
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|value| value.to_str().ok())
    }

    /// `Cache-Control` header.
    #[must_use]
    pub fn cache_control(&self) -> Option<&str> {
        self.headers.get(CACHE_CONTROL).and_then(|value| value.to_str().ok())
    }
}

/// Serves waiting-room pages from the page cache when it is safe to.
#[derive(Clone)]
pub struct CacheGate {
    store: Arc<dyn CacheStore>,
    renderer: Arc<dyn Renderer>,
    clock: Arc<dyn Clock>,
    policy: CachePolicy,
}

impl std::fmt::Debug for CacheGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheGate")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl CacheGate {
    /// Creates a gate.
    #[must_use]
    pub fn new(
        store: Arc<dyn CacheStore>,
        renderer: Arc<dyn Renderer>,
        clock: Arc<dyn Clock>,
        policy: CachePolicy,
    ) -> Self {
        Self {
            store,
            renderer,
            clock,
            policy,
        }
    }

    /// The page store, shared with the purge worker for local invalidation.
    #[must_use]
    pub fn store(&self) -> Arc<dyn CacheStore> {
        Arc::clone(&self.store)
    }

    /// Serves the waiting room for `context`.
    ///
    /// Store failures never fail the request: a failed read is a miss and a
    /// failed write still serves the fresh render. Render failures produce an
    /// uncacheable 500.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidHeader`] if a redirect target cannot be
    /// expressed as a header value.
    #[instrument(skip(self, context, request), fields(cache_key = context.cache_key(), privileged = request.is_privileged()))]
    pub async fn serve(
        &self,
        context: &DownloadContext,
        request: &GateRequest,
    ) -> Result<GateResponse, CacheError> {
        if context.source_kind() == SourceKind::External
            && !paths_match(&url_path(&request.path), &url_path(context.canonical_url()))
        {
            debug!(to = context.canonical_url(), "redirecting to canonical external URL");
            return self.redirect(context.canonical_url());
        }

        if request.is_privileged() {
            return Ok(match self.render(context).await {
                Ok(body) => {
                    debug!("cache BYPASS");
                    GateResponse::uncacheable(StatusCode::OK, body)
                }
                Err(error) => render_failure(&error),
            });
        }

        if let Some(body) = self.cached(context.cache_key()).await {
            debug!("cache HIT");
            return self.public_response(body, CacheState::Hit);
        }

        let body = match self.render(context).await {
            Ok(body) => body,
            Err(error) => return Ok(render_failure(&error)),
        };

        if self.policy.is_poisoned(&body) {
            warn!("fresh render contains personalised markup, not caching");
            return Ok(GateResponse::uncacheable(StatusCode::OK, body));
        }

        if let Err(error) = self
            .store
            .put(context.cache_key(), &body, self.policy.ttl)
            .await
        {
            warn!(error = %error, "failed to store rendered page");
        }
        debug!(bytes = body.len(), "cache MISS");
        self.public_response(body, CacheState::Miss)
    }

    /// Reads a cached page, evicting it if it fails the integrity check.
    async fn cached(&self, key: &str) -> Option<Vec<u8>> {
        let body = match self.store.get(key).await {
            Ok(body) => body?,
            Err(error) => {
                warn!(error = %error, "page cache read failed, treating as miss");
                return None;
            }
        };

        if self.policy.is_poisoned(&body) {
            warn!(cache_key = key, "evicting poisoned cache entry");
            if let Err(error) = self.store.invalidate(key).await {
                warn!(error = %error, "failed to evict poisoned entry");
            }
            return None;
        }
        Some(body)
    }

    async fn render(&self, context: &DownloadContext) -> Result<Vec<u8>, RenderError> {
        let body = self.renderer.render(context).await?;
        if body.is_empty() {
            return Err(RenderError::Empty);
        }
        Ok(body)
    }

    fn public_response(&self, body: Vec<u8>, state: CacheState) -> Result<GateResponse, CacheError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            CACHE_CONTROL,
            HeaderValue::from_str(&self.policy.public_cache_control())?,
        );
        headers.insert(EXPIRES, HeaderValue::from_str(&self.expires())?);
        headers.insert(CACHE_STATE_HEADER, state.header_value());
        Ok(GateResponse {
            status: StatusCode::OK,
            headers,
            body,
            state,
        })
    }

    fn redirect(&self, location: &str) -> Result<GateResponse, CacheError> {
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_str(location)?);
        headers.insert(CACHE_STATE_HEADER, CacheState::Bypass.header_value());
        Ok(GateResponse {
            status: StatusCode::MOVED_PERMANENTLY,
            headers,
            body: Vec::new(),
            state: CacheState::Bypass,
        })
    }

    fn expires(&self) -> String {
        let now = u64::try_from(self.clock.now_millis()).unwrap_or(0);
        let at = UNIX_EPOCH + Duration::from_millis(now) + self.policy.browser_max_age;
        httpdate::fmt_http_date(at)
    }
}

fn render_failure(error: &RenderError) -> GateResponse {
    warn!(error = %error, "render failed, serving uncacheable error");
    GateResponse::server_error()
}
