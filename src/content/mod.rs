//! Read-only access to content items, versions and threads.
//!
//! The waiting room never owns content; it asks a [`ContentRepository`] for
//! exactly what resolution and purge computation need. [`SqliteContentStore`]
//! is the production implementation and doubles as the test fixture store
//! (via its `insert_*` helpers on an in-memory [`crate::Database`]).

mod error;
mod model;
mod store;

pub use error::ContentError;
pub use model::{
    Attachment, ContentItem, ContentStatus, ExternalLink, TaxonomyTerm, ThreadRecord,
    VersionRecord, Viewer,
};
pub use store::{NewContent, NewThread, NewVersion, SqliteContentStore};

use async_trait::async_trait;

/// Data-access contract for content lookups.
#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// Looks up a content item by slug.
    async fn find_by_slug(&self, slug: &str) -> Result<Option<ContentItem>, ContentError>;

    /// Looks up a content item by id.
    async fn find_by_id(&self, content_id: i64) -> Result<Option<ContentItem>, ContentError>;

    /// Looks up a single version record.
    async fn find_version(&self, version_id: i64) -> Result<Option<VersionRecord>, ContentError>;

    /// Most recently uploaded version of a content item.
    async fn find_latest_version(
        &self,
        content_id: i64,
    ) -> Result<Option<VersionRecord>, ContentError>;

    /// Content-level external link configuration.
    async fn find_external_link(
        &self,
        content_id: i64,
    ) -> Result<Option<ExternalLink>, ContentError>;

    /// Looks up a thread with its taxonomy terms.
    async fn find_thread(&self, thread_id: i64) -> Result<Option<ThreadRecord>, ContentError>;
}
