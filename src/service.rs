//! The waiting room as one service: resolve, serve, authorize, purge.
//!
//! [`WaitingRoom`] wires the subsystems together the way a request layer
//! uses them. It owns the purge worker, so it must be built inside a Tokio
//! runtime and should be shut down with [`WaitingRoom::shutdown`].

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::cache::{
    CacheError, CacheGate, CachePolicy, CacheStore, GateRequest, GateResponse, Renderer,
    SqliteCacheStore,
};
use crate::clock::Clock;
use crate::config::{ConfigError, SecurityMode, Settings};
use crate::content::{ContentRepository, SqliteContentStore};
use crate::context::{ContextResolver, DownloadContext, ResolveError, ResolveRequest, SiteUrls};
use crate::db::Database;
use crate::downloads::{DownloadChannel, DownloadQueue, DownloadQueueDrain};
use crate::error::{ClientAction, ClientFacing};
use crate::purge::{
    ContentChange, DEFAULT_QUEUE_CAPACITY, EdgePurger, HttpEdgePurger, NoopEdgePurger, PurgeError,
    PurgeExecutor, PurgePlanner, PurgePropagator,
};
use crate::token::{
    AuthorizedDownload, ClientSignals, ConsumeOutcome, Fingerprint, IssuedToken, TokenConfig,
    TokenError, TokenService,
};

/// Failures surfaced by [`WaitingRoom`] operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The request did not resolve to a download.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Token issuance or consumption failed.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// The page could not be served.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Settings were rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The edge purger could not be built.
    #[error(transparent)]
    Purge(#[from] PurgeError),
}

impl ClientFacing for ServiceError {
    fn status_code(&self) -> u16 {
        match self {
            Self::Resolve(error) => error.status_code(),
            Self::Token(error) => error.status_code(),
            Self::Cache(_) | Self::Config(_) | Self::Purge(_) => 500,
        }
    }

    fn client_action(&self) -> ClientAction {
        match self {
            Self::Resolve(error) => error.client_action(),
            Self::Token(error) => error.client_action(),
            Self::Cache(_) | Self::Config(_) | Self::Purge(_) => ClientAction::Retry,
        }
    }
}

/// The edge purger `settings` ask for: HTTP when an endpoint is set,
/// otherwise one that does nothing.
///
/// # Errors
///
/// Returns [`ServiceError::Config`] for an unparsable endpoint and
/// [`ServiceError::Purge`] if the HTTP client cannot be built.
pub fn edge_purger(settings: &Settings) -> Result<Arc<dyn EdgePurger>, ServiceError> {
    let Some(endpoint) = &settings.purge_endpoint else {
        return Ok(Arc::new(NoopEdgePurger));
    };
    let endpoint = Url::parse(endpoint).map_err(|_| ConfigError::InvalidUrl {
        field: "purge_endpoint",
        value: endpoint.clone(),
    })?;
    Ok(Arc::new(HttpEdgePurger::new(
        endpoint,
        settings.purge_api_token.clone(),
        settings.purge_timeout(),
    )?))
}

/// Control plane of the download waiting room.
#[derive(Debug)]
pub struct WaitingRoom {
    resolver: ContextResolver,
    gate: CacheGate,
    tokens: TokenService,
    downloads: DownloadQueue,
    propagator: PurgePropagator,
    mode: SecurityMode,
    page_rows: Option<SqliteCacheStore>,
}

impl WaitingRoom {
    /// Assembles a waiting room from its parts.
    #[must_use]
    pub fn new(
        resolver: ContextResolver,
        gate: CacheGate,
        tokens: TokenService,
        downloads: DownloadQueue,
        propagator: PurgePropagator,
        mode: SecurityMode,
    ) -> Self {
        Self {
            resolver,
            gate,
            tokens,
            downloads,
            propagator,
            mode,
            page_rows: None,
        }
    }

    /// Lets [`WaitingRoom::drain_job`] also prune expired rows of `pages`.
    #[must_use]
    pub fn with_page_pruning(mut self, pages: SqliteCacheStore) -> Self {
        self.page_rows = Some(pages);
        self
    }

    /// Builds every subsystem over `db` from validated `settings`.
    ///
    /// Pages are cached in `SQLite`; edge purges go to the configured
    /// endpoint, or nowhere when none is set.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Config`] for invalid settings and
    /// [`ServiceError::Purge`] if the HTTP client cannot be built.
    pub fn from_settings(
        settings: &Settings,
        db: Database,
        renderer: Arc<dyn Renderer>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ServiceError> {
        settings.validate()?;
        let urls = SiteUrls::new(&settings.base_url)?;
        let content: Arc<dyn ContentRepository> = Arc::new(SqliteContentStore::new(db.clone()));
        let page_rows = SqliteCacheStore::new(db.clone(), Arc::clone(&clock));
        let pages: Arc<dyn CacheStore> = Arc::new(page_rows.clone());

        let executor = PurgeExecutor::new(
            PurgePlanner::new(Arc::clone(&content), urls.clone()),
            edge_purger(settings)?,
            Some(Arc::clone(&pages)),
            settings.purge_timeout(),
        );

        Ok(Self::new(
            ContextResolver::new(content, urls),
            CacheGate::new(
                pages,
                renderer,
                Arc::clone(&clock),
                CachePolicy::from_settings(settings),
            ),
            TokenService::new(db.clone(), Arc::clone(&clock), TokenConfig::from_settings(settings)),
            DownloadQueue::new(db, clock),
            PurgePropagator::spawn(executor, DEFAULT_QUEUE_CAPACITY),
            settings.security_mode,
        )
        .with_page_pruning(page_rows))
    }

    /// Active anti-abuse mode.
    #[must_use]
    pub fn security_mode(&self) -> SecurityMode {
        self.mode
    }

    /// The context resolver.
    #[must_use]
    pub fn resolver(&self) -> &ContextResolver {
        &self.resolver
    }

    /// The download-event queue.
    #[must_use]
    pub fn downloads(&self) -> &DownloadQueue {
        &self.downloads
    }

    /// A drain job over this room's queue that also prunes token state and,
    /// when pages live in `SQLite`, expired cache rows.
    #[must_use]
    pub fn drain_job(&self, batch_size: u32) -> DownloadQueueDrain {
        let drain = DownloadQueueDrain::new(self.downloads.clone(), batch_size)
            .with_token_pruning(self.tokens.clone());
        match &self.page_rows {
            Some(pages) => drain.with_cache_pruning(pages.clone()),
            None => drain,
        }
    }

    fn fingerprint(&self, signals: &ClientSignals) -> Fingerprint {
        Fingerprint::derive(self.mode, signals)
    }

    async fn resolve(
        &self,
        request: &GateRequest,
        target: &ResolveRequest,
    ) -> Result<DownloadContext, ResolveError> {
        self.resolver.resolve(target, &request.viewer).await
    }

    /// Serves the interstitial for `target`.
    ///
    /// Failed resolution answers with an uncacheable 404 (or 500 when the
    /// store failed). Every client that receives the page, cached or not,
    /// also gets a one-time no-JS permission for it.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Cache`] if a redirect header cannot be built.
    #[instrument(skip_all, fields(slug = %target.slug, path = %request.path))]
    pub async fn show(
        &self,
        target: &ResolveRequest,
        request: &GateRequest,
        signals: &ClientSignals,
    ) -> Result<GateResponse, ServiceError> {
        let context = match self.resolve(request, target).await {
            Ok(context) => context,
            Err(error) if error.is_not_found() => {
                debug!(error = %error, "waiting room not found");
                return Ok(GateResponse::not_found());
            }
            Err(error) => {
                warn!(error = %error, "content store failed during resolution");
                return Ok(GateResponse::server_error());
            }
        };

        let response = self.gate.serve(&context, request).await?;
        // Any page actually shown counts, including uncached ones for members
        if response.status.is_success() {
            let fingerprint = self.fingerprint(signals);
            if let Err(error) = self.tokens.grant_permission(&context, &fingerprint).await {
                warn!(error = %error, "failed to record no-JS permission");
            }
        }
        Ok(response)
    }

    /// Issues a countdown token for `target`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Resolve`] if the target does not resolve and
    /// [`ServiceError::Token`] when rate limited or the store fails.
    #[instrument(skip_all, fields(slug = %target.slug))]
    pub async fn issue_token(
        &self,
        target: &ResolveRequest,
        request: &GateRequest,
        signals: &ClientSignals,
    ) -> Result<IssuedToken, ServiceError> {
        let context = self.resolve(request, target).await?;
        let fingerprint = self.fingerprint(signals);
        Ok(self.tokens.issue_token(&context, &fingerprint, self.mode).await?)
    }

    /// Exchanges `token` for the download of `target`.
    ///
    /// An authorized exchange is recorded on the download queue; recording
    /// failures are logged and do not revoke the authorization.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Resolve`] if the target does not resolve and
    /// [`ServiceError::Token`] if the store fails.
    #[instrument(skip_all, fields(slug = %target.slug))]
    pub async fn exchange_token(
        &self,
        token: &str,
        target: &ResolveRequest,
        request: &GateRequest,
    ) -> Result<ConsumeOutcome, ServiceError> {
        let context = self.resolve(request, target).await?;
        let outcome = self.tokens.consume_token(token, &context).await?;
        if let ConsumeOutcome::Authorized(download) = outcome {
            self.record(download, DownloadChannel::Token).await;
        }
        Ok(outcome)
    }

    /// Redeems the no-JS permission recorded when the page was served.
    ///
    /// Returns `None` when no unexpired permission exists for this client
    /// and target; the client must go back through the interstitial.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Resolve`] if the target does not resolve and
    /// [`ServiceError::Token`] if the store fails.
    #[instrument(skip_all, fields(slug = %target.slug))]
    pub async fn exchange_without_js(
        &self,
        target: &ResolveRequest,
        request: &GateRequest,
        signals: &ClientSignals,
    ) -> Result<Option<AuthorizedDownload>, ServiceError> {
        let context = self.resolve(request, target).await?;
        let fingerprint = self.fingerprint(signals);
        let redeemed = self.tokens.redeem_permission(&context, &fingerprint).await?;
        if let Some(download) = redeemed {
            self.record(download, DownloadChannel::NoJs).await;
        }
        Ok(redeemed)
    }

    async fn record(&self, download: AuthorizedDownload, channel: DownloadChannel) {
        if let Err(error) = self
            .downloads
            .enqueue(download.content_id, download.version_ref, channel)
            .await
        {
            warn!(error = %error, "failed to record download event");
        }
    }

    /// Queues cache invalidation for a content change. Never blocks.
    pub fn notify_change(&self, change: ContentChange) {
        self.propagator.on_content_changed(change);
    }

    /// Stops the purge worker after it finishes queued changes.
    pub async fn shutdown(self) {
        self.propagator.shutdown().await;
    }
}
