//! Public URL layout of the site.
//!
//! Canonical URLs drive both redirects and edge purges, so every URL the
//! waiting room talks about is built here and nowhere else.

use url::Url;
use urlencoding::encode;

use crate::config::ConfigError;

/// Builds absolute site URLs under a base origin (optionally with a path prefix).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteUrls {
    base: Url,
}

impl SiteUrls {
    /// Creates a builder for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUrl`] if `base_url` is not an absolute http(s) URL.
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidUrl {
            field: "base_url",
            value: base_url.to_string(),
        };
        let mut base = Url::parse(base_url).map_err(|_| invalid())?;
        if !matches!(base.scheme(), "http" | "https") || base.host_str().is_none() {
            return Err(invalid());
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.set_query(None);
        base.set_fragment(None);
        Ok(Self { base })
    }

    /// Content item page: `/mods/{slug}/`.
    #[must_use]
    pub fn content(&self, slug: &str) -> String {
        self.build(&["mods", slug])
    }

    /// Waiting room for the latest version: `/mods/{slug}/download/`.
    #[must_use]
    pub fn waiting_room_latest(&self, slug: &str) -> String {
        self.build(&["mods", slug, "download"])
    }

    /// Waiting room for a hosted version: `/mods/{slug}/download/{id}/`.
    #[must_use]
    pub fn waiting_room_version(&self, slug: &str, version_id: i64) -> String {
        self.build(&["mods", slug, "download", &version_id.to_string()])
    }

    /// Waiting room for a version's external link: `/mods/{slug}/download/ext/v/{id}/`.
    #[must_use]
    pub fn external_version(&self, slug: &str, version_id: i64) -> String {
        self.build(&["mods", slug, "download", "ext", "v", &version_id.to_string()])
    }

    /// Waiting room for the item-level external link: `/mods/{slug}/download/ext/m/`.
    #[must_use]
    pub fn external_content(&self, slug: &str) -> String {
        self.build(&["mods", slug, "download", "ext", "m"])
    }

    /// Thread page: `/forums/{section}/{thread}/`.
    #[must_use]
    pub fn thread(&self, section_slug: &str, thread_slug: &str) -> String {
        self.build(&["forums", section_slug, thread_slug])
    }

    /// Forum section index: `/forums/{section}/`.
    #[must_use]
    pub fn section(&self, section_slug: &str) -> String {
        self.build(&["forums", section_slug])
    }

    /// Taxonomy archive: `/{taxonomy}/{term}/`.
    #[must_use]
    pub fn taxonomy_archive(&self, taxonomy: &str, term_slug: &str) -> String {
        self.build(&[taxonomy, term_slug])
    }

    fn build(&self, segments: &[&str]) -> String {
        let mut out = self.base.as_str().to_string();
        for segment in segments {
            out.push_str(&encode(segment));
            out.push('/');
        }
        out
    }
}

/// Extracts the path of an absolute URL, or returns the input when it is already a path.
#[must_use]
pub fn url_path(url_or_path: &str) -> String {
    Url::parse(url_or_path)
        .map(|url| url.path().to_string())
        .unwrap_or_else(|_| {
            url_or_path
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_string()
        })
}

/// Compares two paths ignoring a trailing slash.
#[must_use]
pub fn paths_match(a: &str, b: &str) -> bool {
    let a = a.trim_end_matches('/');
    let b = b.trim_end_matches('/');
    a == b
}
