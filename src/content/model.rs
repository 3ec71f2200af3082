//! Content, version and thread records as the waiting room sees them.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use url::Url;

/// Publication state of a content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    /// Publicly visible.
    Published,
    /// Unpublished work in progress.
    Draft,
    /// Visible to privileged readers only.
    Private,
    /// Deleted; never resolvable.
    Trashed,
}

impl ContentStatus {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Published => "published",
            Self::Draft => "draft",
            Self::Private => "private",
            Self::Trashed => "trashed",
        }
    }
}

impl fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ContentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "published" => Ok(Self::Published),
            "draft" => Ok(Self::Draft),
            "private" => Ok(Self::Private),
            "trashed" => Ok(Self::Trashed),
            _ => Err(format!("invalid content status: {s}")),
        }
    }
}

/// A downloadable content item (a "mod").
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentItem {
    /// Identifier.
    pub id: i64,
    /// Human-readable URL slug.
    pub slug: String,
    /// Display title.
    pub title: String,
    /// Publication state.
    pub status: ContentStatus,
    /// Whether a password gate protects the item.
    pub password_protected: bool,
    /// Owning user, when known.
    pub author_id: Option<i64>,
}

/// Third-party download link attached to a content item or a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalLink {
    /// Target URL as configured.
    pub url: String,
    /// Advertised link label (e.g. "Mirror").
    pub label: Option<String>,
    /// Advertised size text (e.g. "120 MB").
    pub size: Option<String>,
}

impl ExternalLink {
    /// Parses the configured URL, returning `None` for empty, relative,
    /// non-http(s) or host-less values.
    #[must_use]
    pub fn parsed_url(&self) -> Option<Url> {
        let trimmed = self.url.trim();
        if trimmed.is_empty() {
            return None;
        }
        let url = Url::parse(trimmed).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        url.host_str().filter(|host| !host.is_empty())?;
        Some(url)
    }

    /// Whether [`Self::parsed_url`] succeeds.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.parsed_url().is_some()
    }
}

/// A locally stored file backing a hosted version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    /// Attachment identifier in the media store.
    pub id: i64,
    /// Stored file name.
    pub file_name: Option<String>,
    /// Stored file size in bytes.
    pub file_size: Option<i64>,
}

/// One version record of a content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionRecord {
    /// Identifier (unique across all content).
    pub id: i64,
    /// Owning content item.
    pub content_id: i64,
    /// Display version number, e.g. "1.2.0".
    pub number: String,
    /// Hosted file, when present.
    pub attachment: Option<Attachment>,
    /// External link payload, when present.
    pub external: Option<ExternalLink>,
    /// Upload time, unix milliseconds.
    pub uploaded_at: i64,
}

impl VersionRecord {
    /// External payload if it carries a usable URL.
    #[must_use]
    pub fn well_formed_external(&self) -> Option<&ExternalLink> {
        self.external.as_ref().filter(|link| link.is_well_formed())
    }
}

/// Taxonomy term a thread is filed under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaxonomyTerm {
    /// Taxonomy name, e.g. `topic-tag`.
    pub taxonomy: String,
    /// Term slug.
    pub slug: String,
}

/// Discussion thread, resolved for cache purging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadRecord {
    /// Identifier.
    pub id: i64,
    /// Thread slug.
    pub slug: String,
    /// Owning forum section slug.
    pub section_slug: String,
    /// Display title.
    pub title: String,
    /// Terms the thread is tagged under.
    pub terms: Vec<TaxonomyTerm>,
}

/// Who is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Viewer {
    /// No session.
    #[default]
    Anonymous,
    /// Logged-in user.
    Member {
        /// User identifier.
        user_id: i64,
        /// Whether the user may read non-published items.
        can_read_private: bool,
    },
    /// Site administrator.
    Administrator,
}

impl Viewer {
    /// Whether responses for this viewer may contain personalised markup.
    #[must_use]
    pub fn is_privileged(&self) -> bool {
        !matches!(self, Self::Anonymous)
    }

    /// Read permission check for `item`. Trashed items are unreadable for everyone.
    #[must_use]
    pub fn can_read(&self, item: &ContentItem) -> bool {
        match item.status {
            ContentStatus::Trashed => false,
            ContentStatus::Published => true,
            ContentStatus::Draft | ContentStatus::Private => match self {
                Self::Anonymous => false,
                Self::Administrator => true,
                Self::Member {
                    user_id,
                    can_read_private,
                } => *can_read_private || item.author_id == Some(*user_id),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(status: ContentStatus, author_id: Option<i64>) -> ContentItem {
        ContentItem {
            id: 1,
            slug: "neon-drift".to_string(),
            title: "Neon Drift".to_string(),
            status,
            password_protected: false,
            author_id,
        }
    }

    fn link(url: &str) -> ExternalLink {
        ExternalLink {
            url: url.to_string(),
            label: None,
            size: None,
        }
    }

    #[test]
    fn test_external_link_well_formed() {
        assert!(link("https://host.example/file.zip").is_well_formed());
        assert!(link("  http://host.example/a  ").is_well_formed());
    }

    #[test]
    fn test_external_link_rejects_empty_and_malformed() {
        assert!(!link("").is_well_formed());
        assert!(!link("   ").is_well_formed());
        assert!(!link("not a url").is_well_formed());
        assert!(!link("/relative/file.zip").is_well_formed());
        assert!(!link("ftp://host.example/file.zip").is_well_formed());
        assert!(!link("mailto:someone@host.example").is_well_formed());
    }

    #[test]
    fn test_viewer_reads_published() {
        assert!(Viewer::Anonymous.can_read(&item(ContentStatus::Published, None)));
    }

    #[test]
    fn test_viewer_trashed_is_unreadable_even_for_admin() {
        assert!(!Viewer::Administrator.can_read(&item(ContentStatus::Trashed, None)));
    }

    #[test]
    fn test_viewer_draft_requires_permission() {
        let draft = item(ContentStatus::Draft, Some(7));
        assert!(!Viewer::Anonymous.can_read(&draft));
        assert!(Viewer::Administrator.can_read(&draft));
        assert!(
            Viewer::Member {
                user_id: 7,
                can_read_private: false
            }
            .can_read(&draft)
        );
        assert!(
            !Viewer::Member {
                user_id: 8,
                can_read_private: false
            }
            .can_read(&draft)
        );
        assert!(
            Viewer::Member {
                user_id: 8,
                can_read_private: true
            }
            .can_read(&draft)
        );
    }

    #[test]
    fn test_content_status_round_trips_labels() {
        for status in [
            ContentStatus::Published,
            ContentStatus::Draft,
            ContentStatus::Private,
            ContentStatus::Trashed,
        ] {
            assert_eq!(status.as_str().parse::<ContentStatus>(), Ok(status));
        }
        assert!("archived".parse::<ContentStatus>().is_err());
    }
}
