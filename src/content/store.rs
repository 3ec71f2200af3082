//! SQLite-backed content repository.

use async_trait::async_trait;
use sqlx::{FromRow, Row};
use tracing::instrument;

use super::{
    Attachment, ContentError, ContentItem, ContentRepository, ContentStatus, ExternalLink,
    TaxonomyTerm, ThreadRecord, VersionRecord,
};
use crate::db::Database;

/// Content repository over the `content_items`, `content_versions` and `threads` tables.
#[derive(Debug, Clone)]
pub struct SqliteContentStore {
    db: Database,
}

/// Insert payload for a content item.
#[derive(Debug, Clone)]
pub struct NewContent<'a> {
    /// URL slug.
    pub slug: &'a str,
    /// Display title.
    pub title: &'a str,
    /// Publication state.
    pub status: ContentStatus,
    /// Password gate flag.
    pub password_protected: bool,
    /// Owning user.
    pub author_id: Option<i64>,
    /// Content-level external link.
    pub external: Option<ExternalLink>,
}

impl<'a> NewContent<'a> {
    /// A published, unprotected item without external link.
    #[must_use]
    pub fn published(slug: &'a str, title: &'a str) -> Self {
        Self {
            slug,
            title,
            status: ContentStatus::Published,
            password_protected: false,
            author_id: None,
            external: None,
        }
    }
}

/// Insert payload for a version record.
#[derive(Debug, Clone)]
pub struct NewVersion<'a> {
    /// Owning content item.
    pub content_id: i64,
    /// Display number.
    pub number: &'a str,
    /// Hosted file.
    pub attachment: Option<Attachment>,
    /// External payload.
    pub external: Option<ExternalLink>,
    /// Upload time, unix milliseconds.
    pub uploaded_at: i64,
}

/// Insert payload for a thread.
#[derive(Debug, Clone)]
pub struct NewThread<'a> {
    /// Thread slug.
    pub slug: &'a str,
    /// Forum section slug.
    pub section_slug: &'a str,
    /// Display title.
    pub title: &'a str,
    /// Taxonomy terms.
    pub terms: Vec<TaxonomyTerm>,
}

#[derive(Debug, FromRow)]
struct ContentRow {
    id: i64,
    slug: String,
    title: String,
    status: String,
    password_protected: bool,
    author_id: Option<i64>,
}

impl ContentRow {
    fn into_item(self) -> Result<ContentItem, ContentError> {
        let status = self
            .status
            .parse::<ContentStatus>()
            .map_err(|reason| ContentError::corrupt("content_items", self.id, reason))?;
        Ok(ContentItem {
            id: self.id,
            slug: self.slug,
            title: self.title,
            status,
            password_protected: self.password_protected,
            author_id: self.author_id,
        })
    }
}

#[derive(Debug, FromRow)]
struct VersionRow {
    id: i64,
    content_id: i64,
    number: String,
    attachment_id: Option<i64>,
    file_name: Option<String>,
    file_size: Option<i64>,
    external_url: Option<String>,
    external_label: Option<String>,
    external_size: Option<String>,
    uploaded_at: i64,
}

impl From<VersionRow> for VersionRecord {
    fn from(row: VersionRow) -> Self {
        let attachment = row.attachment_id.map(|id| Attachment {
            id,
            file_name: row.file_name,
            file_size: row.file_size,
        });
        Self {
            id: row.id,
            content_id: row.content_id,
            number: row.number,
            attachment,
            external: external_link(row.external_url, row.external_label, row.external_size),
            uploaded_at: row.uploaded_at,
        }
    }
}

/// Builds a link payload only when a URL column is set at all; well-formedness
/// is judged later by the resolver.
fn external_link(
    url: Option<String>,
    label: Option<String>,
    size: Option<String>,
) -> Option<ExternalLink> {
    url.map(|url| ExternalLink { url, label, size })
}

const VERSION_COLUMNS: &str = "id, content_id, number, attachment_id, file_name, file_size, \
     external_url, external_label, external_size, uploaded_at";

impl SqliteContentStore {
    /// Creates a store over `db`.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts a content item and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::Database`] on constraint or query failure.
    #[instrument(skip(self, content), fields(slug = %content.slug))]
    pub async fn insert_content(&self, content: &NewContent<'_>) -> Result<i64, ContentError> {
        let external = content.external.as_ref();
        let row = sqlx::query(
            r"INSERT INTO content_items
                (slug, title, status, password_protected, author_id,
                 external_url, external_label, external_size)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?)
              RETURNING id",
        )
        .bind(content.slug)
        .bind(content.title)
        .bind(content.status.as_str())
        .bind(content.password_protected)
        .bind(content.author_id)
        .bind(external.map(|link| link.url.as_str()))
        .bind(external.and_then(|link| link.label.as_deref()))
        .bind(external.and_then(|link| link.size.as_deref()))
        .fetch_one(self.db.pool())
        .await?;

        Ok(row.get("id"))
    }

    /// Inserts a version record and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::Database`] on constraint or query failure.
    #[instrument(skip(self, version), fields(content_id = version.content_id, number = %version.number))]
    pub async fn insert_version(&self, version: &NewVersion<'_>) -> Result<i64, ContentError> {
        let attachment = version.attachment.as_ref();
        let external = version.external.as_ref();
        let row = sqlx::query(
            r"INSERT INTO content_versions
                (content_id, number, attachment_id, file_name, file_size,
                 external_url, external_label, external_size, uploaded_at)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
              RETURNING id",
        )
        .bind(version.content_id)
        .bind(version.number)
        .bind(attachment.map(|a| a.id))
        .bind(attachment.and_then(|a| a.file_name.as_deref()))
        .bind(attachment.and_then(|a| a.file_size))
        .bind(external.map(|link| link.url.as_str()))
        .bind(external.and_then(|link| link.label.as_deref()))
        .bind(external.and_then(|link| link.size.as_deref()))
        .bind(version.uploaded_at)
        .fetch_one(self.db.pool())
        .await?;

        Ok(row.get("id"))
    }

    /// Changes the publication state of an item.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn set_status(&self, content_id: i64, status: ContentStatus) -> Result<(), ContentError> {
        sqlx::query("UPDATE content_items SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(content_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Replaces (or clears) the content-level external link.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::Database`] if the update fails.
    #[instrument(skip(self, link))]
    pub async fn set_external_link(
        &self,
        content_id: i64,
        link: Option<&ExternalLink>,
    ) -> Result<(), ContentError> {
        sqlx::query(
            r"UPDATE content_items
              SET external_url = ?, external_label = ?, external_size = ?
              WHERE id = ?",
        )
        .bind(link.map(|l| l.url.as_str()))
        .bind(link.and_then(|l| l.label.as_deref()))
        .bind(link.and_then(|l| l.size.as_deref()))
        .bind(content_id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Inserts a thread with its taxonomy terms and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::Database`] on constraint or query failure.
    #[instrument(skip(self, thread), fields(slug = %thread.slug))]
    pub async fn insert_thread(&self, thread: &NewThread<'_>) -> Result<i64, ContentError> {
        let mut tx = self.db.pool().begin().await?;

        let row = sqlx::query(
            "INSERT INTO threads (slug, section_slug, title) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(thread.slug)
        .bind(thread.section_slug)
        .bind(thread.title)
        .fetch_one(&mut *tx)
        .await?;
        let thread_id: i64 = row.get("id");

        for term in &thread.terms {
            sqlx::query(
                "INSERT OR IGNORE INTO thread_terms (thread_id, taxonomy, term_slug) VALUES (?, ?, ?)",
            )
            .bind(thread_id)
            .bind(&term.taxonomy)
            .bind(&term.slug)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(thread_id)
    }
}

#[async_trait]
impl ContentRepository for SqliteContentStore {
    #[instrument(skip(self))]
    async fn find_by_slug(&self, slug: &str) -> Result<Option<ContentItem>, ContentError> {
        let row = sqlx::query_as::<_, ContentRow>(
            r"SELECT id, slug, title, status, password_protected, author_id
              FROM content_items WHERE slug = ?",
        )
        .bind(slug)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(ContentRow::into_item).transpose()
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, content_id: i64) -> Result<Option<ContentItem>, ContentError> {
        let row = sqlx::query_as::<_, ContentRow>(
            r"SELECT id, slug, title, status, password_protected, author_id
              FROM content_items WHERE id = ?",
        )
        .bind(content_id)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(ContentRow::into_item).transpose()
    }

    #[instrument(skip(self))]
    async fn find_version(&self, version_id: i64) -> Result<Option<VersionRecord>, ContentError> {
        let row = sqlx::query_as::<_, VersionRow>(&format!(
            "SELECT {VERSION_COLUMNS} FROM content_versions WHERE id = ?"
        ))
        .bind(version_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(VersionRecord::from))
    }

    #[instrument(skip(self))]
    async fn find_latest_version(
        &self,
        content_id: i64,
    ) -> Result<Option<VersionRecord>, ContentError> {
        let row = sqlx::query_as::<_, VersionRow>(&format!(
            "SELECT {VERSION_COLUMNS} FROM content_versions
             WHERE content_id = ?
             ORDER BY uploaded_at DESC, id DESC
             LIMIT 1"
        ))
        .bind(content_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(VersionRecord::from))
    }

    #[instrument(skip(self))]
    async fn find_external_link(
        &self,
        content_id: i64,
    ) -> Result<Option<ExternalLink>, ContentError> {
        let row = sqlx::query(
            "SELECT external_url, external_label, external_size FROM content_items WHERE id = ?",
        )
        .bind(content_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.and_then(|row| {
            external_link(
                row.get("external_url"),
                row.get("external_label"),
                row.get("external_size"),
            )
        }))
    }

    #[instrument(skip(self))]
    async fn find_thread(&self, thread_id: i64) -> Result<Option<ThreadRecord>, ContentError> {
        let Some(row) = sqlx::query("SELECT id, slug, section_slug, title FROM threads WHERE id = ?")
            .bind(thread_id)
            .fetch_optional(self.db.pool())
            .await?
        else {
            return Ok(None);
        };

        let terms = sqlx::query(
            r"SELECT taxonomy, term_slug FROM thread_terms
              WHERE thread_id = ?
              ORDER BY taxonomy, term_slug",
        )
        .bind(thread_id)
        .fetch_all(self.db.pool())
        .await?
        .into_iter()
        .map(|term| TaxonomyTerm {
            taxonomy: term.get("taxonomy"),
            slug: term.get("term_slug"),
        })
        .collect();

        Ok(Some(ThreadRecord {
            id: row.get("id"),
            slug: row.get("slug"),
            section_slug: row.get("section_slug"),
            title: row.get("title"),
            terms,
        }))
    }
}
