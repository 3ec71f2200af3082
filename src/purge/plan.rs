//! URL and cache-key closures for content changes.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument};

use super::{ContentChange, PurgeError};
use crate::content::{ContentRepository, ThreadRecord};
use crate::context::SiteUrls;
use crate::context::keys;

/// Everything a change can make stale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgePlan {
    /// Public URLs to evict from the edge cache, deduplicated, in discovery order.
    pub urls: Vec<String>,
    /// Local page-cache keys to invalidate.
    pub cache_keys: Vec<String>,
}

impl PurgePlan {
    /// Whether there is nothing to purge.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty() && self.cache_keys.is_empty()
    }

    fn push_url(&mut self, url: String) {
        if !self.urls.contains(&url) {
            self.urls.push(url);
        }
    }

    fn push_key(&mut self, key: String) {
        if !self.cache_keys.contains(&key) {
            self.cache_keys.push(key);
        }
    }
}

/// Computes [`PurgePlan`]s from [`ContentChange`]s.
#[derive(Clone)]
pub struct PurgePlanner {
    repository: Arc<dyn ContentRepository>,
    urls: SiteUrls,
}

impl std::fmt::Debug for PurgePlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PurgePlanner")
            .field("urls", &self.urls)
            .finish_non_exhaustive()
    }
}

impl PurgePlanner {
    /// Creates a planner.
    #[must_use]
    pub fn new(repository: Arc<dyn ContentRepository>, urls: SiteUrls) -> Self {
        Self { repository, urls }
    }

    /// Computes the closure for `change`. Records that no longer exist yield
    /// an empty plan.
    ///
    /// # Errors
    ///
    /// Returns [`PurgeError::Plan`] if the content store fails.
    #[instrument(skip(self))]
    pub async fn plan(&self, change: &ContentChange) -> Result<PurgePlan, PurgeError> {
        let mut plan = PurgePlan::default();
        match change {
            ContentChange::VersionSaved {
                content_id,
                version_id,
            } => {
                let Some(content) = self.repository.find_by_id(*content_id).await? else {
                    debug!("content no longer exists, nothing to purge");
                    return Ok(plan);
                };
                plan.push_url(self.urls.content(&content.slug));
                plan.push_url(self.urls.waiting_room_version(&content.slug, *version_id));
                plan.push_url(self.urls.waiting_room_latest(&content.slug));
                plan.push_url(self.urls.external_version(&content.slug, *version_id));
                plan.push_url(self.urls.external_content(&content.slug));
                for key in keys::cache_keys_for_version(*content_id, *version_id) {
                    plan.push_key(key);
                }
            }
            ContentChange::ContentSaved { content_id } => {
                let Some(content) = self.repository.find_by_id(*content_id).await? else {
                    debug!("content no longer exists, nothing to purge");
                    return Ok(plan);
                };
                plan.push_url(self.urls.content(&content.slug));
                plan.push_url(self.urls.waiting_room_latest(&content.slug));
                plan.push_url(self.urls.external_content(&content.slug));
                plan.push_key(keys::external_content_cache_key(*content_id));
                if let Some(latest) = self.repository.find_latest_version(*content_id).await? {
                    plan.push_url(self.urls.waiting_room_version(&content.slug, latest.id));
                    for key in keys::cache_keys_for_version(*content_id, latest.id) {
                        plan.push_key(key);
                    }
                }
            }
            ContentChange::ThreadSaved { thread_id } => {
                let Some(thread) = self.repository.find_thread(*thread_id).await? else {
                    debug!("thread no longer exists, nothing to purge");
                    return Ok(plan);
                };
                self.push_thread(&mut plan, &thread);
            }
            ContentChange::ThreadDeleted { snapshot } => self.push_thread(&mut plan, snapshot),
        }
        debug!(urls = plan.urls.len(), keys = plan.cache_keys.len(), "computed purge plan");
        Ok(plan)
    }

    fn push_thread(&self, plan: &mut PurgePlan, thread: &ThreadRecord) {
        plan.push_url(self.urls.thread(&thread.section_slug, &thread.slug));
        plan.push_url(self.urls.section(&thread.section_slug));
        for term in &thread.terms {
            plan.push_url(self.urls.taxonomy_archive(&term.taxonomy, &term.slug));
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::content::{NewContent, NewThread, SqliteContentStore, TaxonomyTerm};

    async fn planner() -> (PurgePlanner, SqliteContentStore) {
        let store = SqliteContentStore::new(Database::new_in_memory().await.unwrap());
        let planner = PurgePlanner::new(
            Arc::new(store.clone()),
            SiteUrls::new("https://mods.example").unwrap(),
        );
        (planner, store)
    }

    #[tokio::test]
    async fn test_version_change_covers_content_version_and_latest() {
        let (planner, store) = planner().await;
        let id = store
            .insert_content(&NewContent::published("neon-drift", "Neon Drift"))
            .await
            .unwrap();

        let plan = planner
            .plan(&ContentChange::VersionSaved {
                content_id: id,
                version_id: 42,
            })
            .await
            .unwrap();

        assert!(plan.urls.contains(&"https://mods.example/mods/neon-drift/".to_string()));
        assert!(
            plan.urls
                .contains(&"https://mods.example/mods/neon-drift/download/42/".to_string())
        );
        assert!(
            plan.urls
                .contains(&"https://mods.example/mods/neon-drift/download/".to_string())
        );
        assert_eq!(
            plan.cache_keys,
            ["wr:42".to_string(), "wr:ext:v:42".to_string(), format!("wr:ext:m:{id}")]
        );
    }

    #[tokio::test]
    async fn test_thread_change_covers_section_and_archives_once() {
        let (planner, store) = planner().await;
        let tag = |slug: &str| TaxonomyTerm {
            taxonomy: "topic-tag".to_string(),
            slug: slug.to_string(),
        };
        let thread_id = store
            .insert_thread(&NewThread {
                slug: "crash-on-load",
                section_slug: "support",
                title: "Crash on load",
                terms: vec![tag("windows"), tag("crash")],
            })
            .await
            .unwrap();

        let plan = planner
            .plan(&ContentChange::ThreadSaved { thread_id })
            .await
            .unwrap();
        assert_eq!(
            plan.urls,
            [
                "https://mods.example/forums/support/crash-on-load/",
                "https://mods.example/forums/support/",
                "https://mods.example/topic-tag/crash/",
                "https://mods.example/topic-tag/windows/",
            ]
        );
        assert!(plan.cache_keys.is_empty());
    }

    #[tokio::test]
    async fn test_deleted_thread_uses_snapshot() {
        let (planner, _) = planner().await;
        let snapshot = ThreadRecord {
            id: 99,
            slug: "gone".to_string(),
            section_slug: "general".to_string(),
            title: "Gone".to_string(),
            terms: Vec::new(),
        };
        let plan = planner
            .plan(&ContentChange::ThreadDeleted { snapshot })
            .await
            .unwrap();
        assert_eq!(plan.urls.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_records_give_empty_plan() {
        let (planner, _) = planner().await;
        for change in [
            ContentChange::VersionSaved {
                content_id: 1,
                version_id: 2,
            },
            ContentChange::ContentSaved { content_id: 1 },
            ContentChange::ThreadSaved { thread_id: 1 },
        ] {
            assert!(planner.plan(&change).await.unwrap().is_empty());
        }
    }
}
