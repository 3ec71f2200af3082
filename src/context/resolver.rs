//! The resolution pipeline.
//!
//! Order (each step short-circuits to an error):
//! 1. content item by slug, with status/password/permission checks
//! 2. explicit version id
//! 3. explicit external-link request (`version` or `mod`)
//! 4. latest version, falling back to the item-level external link

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, instrument};

use super::keys;
use super::{
    DownloadContext, DownloadSource, ExternalSource, ExternalTarget, ExternalType, HostedSource,
    ResolveError, ResolveRequest, SiteUrls, VersionRef,
};
use crate::content::{ContentItem, ContentRepository, ExternalLink, VersionRecord, Viewer};

#[allow(clippy::expect_used)]
static SLUG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9-]{0,199}$").expect("slug regex is valid") // Static pattern, safe to panic
});

/// Turns [`ResolveRequest`]s into [`DownloadContext`]s.
#[derive(Clone)]
pub struct ContextResolver {
    repository: Arc<dyn ContentRepository>,
    urls: SiteUrls,
}

impl std::fmt::Debug for ContextResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextResolver")
            .field("urls", &self.urls)
            .finish_non_exhaustive()
    }
}

impl ContextResolver {
    /// Creates a resolver over `repository`.
    #[must_use]
    pub fn new(repository: Arc<dyn ContentRepository>, urls: SiteUrls) -> Self {
        Self { repository, urls }
    }

    /// Site URL builder shared with other components.
    #[must_use]
    pub fn urls(&self) -> &SiteUrls {
        &self.urls
    }

    /// Resolves `request` for `viewer`.
    ///
    /// Identical inputs against unchanged content always produce identical
    /// contexts (and therefore identical keys).
    ///
    /// # Errors
    ///
    /// - [`ResolveError::NotFound`] for unknown, trashed, protected or unreadable targets
    /// - [`ResolveError::InvalidExternalConfig`] for missing/malformed external links
    /// - [`ResolveError::Repository`] when the content store fails
    #[instrument(skip(self, request, viewer), fields(slug = %request.slug, version_id = ?request.version_id, external = ?request.external_type))]
    pub async fn resolve(
        &self,
        request: &ResolveRequest,
        viewer: &Viewer,
    ) -> Result<DownloadContext, ResolveError> {
        let content = self.resolve_content(&request.slug, viewer).await?;

        let context = if let Some(version_id) = request.version_id {
            let version = self.resolve_owned_version(&content, version_id).await?;
            self.version_context(&content, &version)?
        } else {
            match request.external_type {
                ExternalType::Version => {
                    let version_id = request.external_target.ok_or_else(|| {
                        ResolveError::not_found("external version request without target")
                    })?;
                    let version = self.resolve_owned_version(&content, version_id).await?;
                    let link = version.external.as_ref().ok_or_else(|| {
                        ResolveError::invalid_external(content.id, "version has no external link")
                    })?;
                    self.external_context(
                        &content,
                        VersionRef::Id(version.id),
                        Some(&version.number),
                        ExternalTarget::Version(version.id),
                        link,
                    )?
                }
                ExternalType::Mod => {
                    if let Some(target) = request.external_target
                        && target != content.id
                    {
                        return Err(ResolveError::not_found(format!(
                            "external target {target} does not match content {}",
                            content.id
                        )));
                    }
                    self.content_link_context(&content).await?
                }
                ExternalType::None => match self.repository.find_latest_version(content.id).await? {
                    Some(version) => self.version_context(&content, &version)?,
                    None => self.content_link_context(&content).await?,
                },
            }
        };

        debug!(
            cache_key = context.cache_key(),
            kind = ?context.source_kind(),
            "resolved download context"
        );
        Ok(context)
    }

    async fn resolve_content(&self, slug: &str, viewer: &Viewer) -> Result<ContentItem, ResolveError> {
        if !SLUG_PATTERN.is_match(slug) {
            return Err(ResolveError::not_found("malformed slug"));
        }
        let content = self
            .repository
            .find_by_slug(slug)
            .await?
            .ok_or_else(|| ResolveError::not_found("unknown slug"))?;

        if content.password_protected {
            return Err(ResolveError::not_found("content is password protected"));
        }
        if !viewer.can_read(&content) {
            return Err(ResolveError::not_found(format!(
                "content status {} not readable",
                content.status
            )));
        }
        Ok(content)
    }

    async fn resolve_owned_version(
        &self,
        content: &ContentItem,
        version_id: i64,
    ) -> Result<VersionRecord, ResolveError> {
        let version = self
            .repository
            .find_version(version_id)
            .await?
            .ok_or_else(|| ResolveError::not_found(format!("unknown version {version_id}")))?;
        if version.content_id != content.id {
            return Err(ResolveError::not_found(format!(
                "version {version_id} does not belong to content {}",
                content.id
            )));
        }
        Ok(version)
    }

    /// Hosted unless the version carries a well-formed external payload.
    fn version_context(
        &self,
        content: &ContentItem,
        version: &VersionRecord,
    ) -> Result<DownloadContext, ResolveError> {
        if let Some(link) = version.well_formed_external() {
            return self.external_context(
                content,
                VersionRef::Id(version.id),
                Some(&version.number),
                ExternalTarget::Version(version.id),
                link,
            );
        }

        let Some(attachment) = &version.attachment else {
            return Err(if version.external.is_some() {
                ResolveError::invalid_external(content.id, "version external link is malformed")
            } else {
                ResolveError::not_found(format!("version {} has no file", version.id))
            });
        };

        let version_ref = VersionRef::Id(version.id);
        Ok(DownloadContext {
            content_id: content.id,
            slug: content.slug.clone(),
            title: content.title.clone(),
            version_ref,
            version_number: Some(version.number.clone()),
            source: DownloadSource::Hosted(HostedSource {
                version_id: version.id,
                attachment_id: attachment.id,
                file_name: attachment.file_name.clone(),
                file_size: attachment.file_size,
            }),
            cache_key: keys::hosted_cache_key(version.id),
            session_key: keys::session_key(content.id, version_ref, false),
            canonical_url: self.urls.waiting_room_version(&content.slug, version.id),
        })
    }

    async fn content_link_context(&self, content: &ContentItem) -> Result<DownloadContext, ResolveError> {
        let link = self
            .repository
            .find_external_link(content.id)
            .await?
            .ok_or_else(|| ResolveError::invalid_external(content.id, "no versions and no external link"))?;
        self.external_context(
            content,
            VersionRef::Latest,
            None,
            ExternalTarget::Content(content.id),
            &link,
        )
    }

    fn external_context(
        &self,
        content: &ContentItem,
        version_ref: VersionRef,
        version_number: Option<&str>,
        target: ExternalTarget,
        link: &ExternalLink,
    ) -> Result<DownloadContext, ResolveError> {
        let url = link
            .parsed_url()
            .ok_or_else(|| ResolveError::invalid_external(content.id, "external URL is empty or malformed"))?;
        let domain = external_domain(url.host_str().unwrap_or_default());

        let canonical_url = match target {
            ExternalTarget::Version(version_id) => self.urls.external_version(&content.slug, version_id),
            ExternalTarget::Content(_) => self.urls.external_content(&content.slug),
        };

        Ok(DownloadContext {
            content_id: content.id,
            slug: content.slug.clone(),
            title: content.title.clone(),
            version_ref,
            version_number: version_number.map(str::to_string),
            source: DownloadSource::External(ExternalSource {
                target,
                url: url.to_string(),
                domain,
                label: link.label.clone(),
                size: link.size.clone(),
            }),
            cache_key: keys::external_cache_key(target),
            session_key: keys::session_key(content.id, version_ref, true),
            canonical_url,
        })
    }
}

/// Lowercases a host and removes one leading `www.` label.
#[must_use]
pub(crate) fn external_domain(host: &str) -> String {
    let host = host.to_ascii_lowercase();
    match host.strip_prefix("www.") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => host,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::content::{Attachment, ContentStatus, NewContent, NewVersion, SqliteContentStore};
    use crate::context::SourceKind;

    struct Fixture {
        store: SqliteContentStore,
        resolver: ContextResolver,
    }

    async fn fixture() -> Fixture {
        let store = SqliteContentStore::new(Database::new_in_memory().await.unwrap());
        let resolver = ContextResolver::new(
            Arc::new(store.clone()),
            SiteUrls::new("https://mods.example").unwrap(),
        );
        Fixture { store, resolver }
    }

    fn hosted_version(content_id: i64, uploaded_at: i64) -> NewVersion<'static> {
        NewVersion {
            content_id,
            number: "1.0",
            attachment: Some(Attachment {
                id: 5,
                file_name: Some("file.zip".to_string()),
                file_size: Some(2048),
            }),
            external: None,
            uploaded_at,
        }
    }

    fn link(url: &str) -> ExternalLink {
        ExternalLink {
            url: url.to_string(),
            label: Some("Mirror".to_string()),
            size: Some("12 MB".to_string()),
        }
    }

    #[test]
    fn test_external_domain_strips_leading_www() {
        assert_eq!(external_domain("www.host.example"), "host.example");
        assert_eq!(external_domain("WWW.Host.Example"), "host.example");
        assert_eq!(external_domain("cdn.www.host.example"), "cdn.www.host.example");
        assert_eq!(external_domain("www."), "www.");
    }

    #[tokio::test]
    async fn test_resolve_latest_hosted_version() {
        let f = fixture().await;
        let id = f
            .store
            .insert_content(&NewContent::published("neon-drift", "Neon Drift"))
            .await
            .unwrap();
        let version_id = f.store.insert_version(&hosted_version(id, 10)).await.unwrap();

        let ctx = f
            .resolver
            .resolve(&ResolveRequest::latest("neon-drift"), &Viewer::Anonymous)
            .await
            .unwrap();

        assert_eq!(ctx.source_kind(), SourceKind::Hosted);
        assert_eq!(ctx.cache_key(), format!("wr:{version_id}"));
        assert_eq!(ctx.version_ref(), VersionRef::Id(version_id));
        assert_eq!(
            ctx.canonical_url(),
            format!("https://mods.example/mods/neon-drift/download/{version_id}/")
        );
        assert!(ctx.external_url().is_none());
    }

    #[tokio::test]
    async fn test_resolve_rejects_version_of_other_content() {
        let f = fixture().await;
        let a = f
            .store
            .insert_content(&NewContent::published("a", "A"))
            .await
            .unwrap();
        let b = f
            .store
            .insert_content(&NewContent::published("b", "B"))
            .await
            .unwrap();
        let b_version = f.store.insert_version(&hosted_version(b, 10)).await.unwrap();
        assert_ne!(a, b);

        let result = f
            .resolver
            .resolve(&ResolveRequest::version("a", b_version), &Viewer::Anonymous)
            .await;
        assert!(matches!(result, Err(ResolveError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_resolve_version_with_external_payload_is_external() {
        let f = fixture().await;
        let id = f
            .store
            .insert_content(&NewContent::published("neon-drift", "Neon Drift"))
            .await
            .unwrap();
        let version_id = f
            .store
            .insert_version(&NewVersion {
                external: Some(link("https://www.files.example/v2.zip")),
                attachment: None,
                ..hosted_version(id, 10)
            })
            .await
            .unwrap();

        let ctx = f
            .resolver
            .resolve(&ResolveRequest::version("neon-drift", version_id), &Viewer::Anonymous)
            .await
            .unwrap();

        assert_eq!(ctx.source_kind(), SourceKind::External);
        assert_eq!(ctx.external_domain(), Some("files.example"));
        assert_eq!(ctx.cache_key(), format!("wr:ext:v:{version_id}"));
    }

    #[tokio::test]
    async fn test_resolve_malformed_version_payload_falls_back_to_hosted_file() {
        let f = fixture().await;
        let id = f
            .store
            .insert_content(&NewContent::published("neon-drift", "Neon Drift"))
            .await
            .unwrap();
        let version_id = f
            .store
            .insert_version(&NewVersion {
                external: Some(link("")),
                ..hosted_version(id, 10)
            })
            .await
            .unwrap();

        let ctx = f
            .resolver
            .resolve(&ResolveRequest::version("neon-drift", version_id), &Viewer::Anonymous)
            .await
            .unwrap();
        assert_eq!(ctx.source_kind(), SourceKind::Hosted);
    }

    #[tokio::test]
    async fn test_resolve_external_mod_with_empty_url_is_invalid_config() {
        let f = fixture().await;
        f.store
            .insert_content(&NewContent {
                external: Some(link("   ")),
                ..NewContent::published("neon-drift", "Neon Drift")
            })
            .await
            .unwrap();

        let result = f
            .resolver
            .resolve(
                &ResolveRequest::external("neon-drift", ExternalType::Mod, None),
                &Viewer::Anonymous,
            )
            .await;
        assert!(matches!(result, Err(ResolveError::InvalidExternalConfig { .. })));
    }

    #[tokio::test]
    async fn test_resolve_external_mod_target_must_match_content() {
        let f = fixture().await;
        let id = f
            .store
            .insert_content(&NewContent {
                external: Some(link("https://host.example/file.zip")),
                ..NewContent::published("neon-drift", "Neon Drift")
            })
            .await
            .unwrap();

        let result = f
            .resolver
            .resolve(
                &ResolveRequest::external("neon-drift", ExternalType::Mod, Some(id + 100)),
                &Viewer::Anonymous,
            )
            .await;
        assert!(matches!(result, Err(ResolveError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_resolve_external_version_requires_link() {
        let f = fixture().await;
        let id = f
            .store
            .insert_content(&NewContent::published("neon-drift", "Neon Drift"))
            .await
            .unwrap();
        let version_id = f.store.insert_version(&hosted_version(id, 10)).await.unwrap();

        let result = f
            .resolver
            .resolve(
                &ResolveRequest::external("neon-drift", ExternalType::Version, Some(version_id)),
                &Viewer::Anonymous,
            )
            .await;
        assert!(matches!(result, Err(ResolveError::InvalidExternalConfig { .. })));
    }

    #[tokio::test]
    async fn test_resolve_without_versions_or_link_is_not_found() {
        let f = fixture().await;
        f.store
            .insert_content(&NewContent::published("empty", "Empty"))
            .await
            .unwrap();

        let result = f
            .resolver
            .resolve(&ResolveRequest::latest("empty"), &Viewer::Anonymous)
            .await;
        let error = result.unwrap_err();
        assert!(error.is_not_found());
    }

    #[tokio::test]
    async fn test_resolve_hides_trashed_protected_and_drafts() {
        let f = fixture().await;
        let trashed = f
            .store
            .insert_content(&NewContent {
                status: ContentStatus::Trashed,
                ..NewContent::published("trashed", "T")
            })
            .await
            .unwrap();
        f.store.insert_version(&hosted_version(trashed, 1)).await.unwrap();
        let protected = f
            .store
            .insert_content(&NewContent {
                password_protected: true,
                ..NewContent::published("protected", "P")
            })
            .await
            .unwrap();
        f.store.insert_version(&hosted_version(protected, 1)).await.unwrap();
        let draft = f
            .store
            .insert_content(&NewContent {
                status: ContentStatus::Draft,
                ..NewContent::published("draft", "D")
            })
            .await
            .unwrap();
        f.store.insert_version(&hosted_version(draft, 1)).await.unwrap();

        for slug in ["trashed", "protected", "draft"] {
            let result = f
                .resolver
                .resolve(&ResolveRequest::latest(slug), &Viewer::Anonymous)
                .await;
            assert!(matches!(result, Err(ResolveError::NotFound { .. })), "{slug}");
        }

        let admin = f
            .resolver
            .resolve(&ResolveRequest::latest("draft"), &Viewer::Administrator)
            .await;
        assert!(admin.is_ok());
        let admin_trashed = f
            .resolver
            .resolve(&ResolveRequest::latest("trashed"), &Viewer::Administrator)
            .await;
        assert!(admin_trashed.is_err());
    }

    #[tokio::test]
    async fn test_resolve_rejects_malformed_slug_without_lookup() {
        let f = fixture().await;
        for slug in ["", "Neon", "../etc", "a b", "-lead"] {
            let result = f
                .resolver
                .resolve(&ResolveRequest::latest(slug), &Viewer::Anonymous)
                .await;
            assert!(matches!(result, Err(ResolveError::NotFound { .. })), "{slug}");
        }
    }
}
