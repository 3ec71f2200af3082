//! Shared fixtures for integration tests.
//!
//! Each test gets its own file-backed database in a `TempDir`, a manual
//! clock it can move forward, and a renderer that counts its calls.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tempfile::TempDir;
use waiting_room::cache::RenderError;
use waiting_room::clock::ManualClock;
use waiting_room::content::{Attachment, ExternalLink, NewContent, NewVersion, SqliteContentStore};
use waiting_room::{Database, DownloadContext, Renderer};

/// Site origin used by every test.
pub const BASE_URL: &str = "https://mods.example";

/// Start time of the manual clock, unix milliseconds.
pub const START_MILLIS: i64 = 1_700_000_000_000;

/// Creates a file-backed database with migrations applied.
pub async fn setup_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("waiting-room.db");

    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");

    (db, temp_dir)
}

/// A clock frozen at [`START_MILLIS`].
pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(START_MILLIS))
}

/// Ids of the seeded `neon-drift` item.
#[derive(Debug, Clone, Copy)]
pub struct Seeded {
    pub content_id: i64,
    pub version_id: i64,
}

/// Seeds a published `neon-drift` item with one hosted version.
pub async fn seed_neon_drift(db: &Database) -> Seeded {
    let store = SqliteContentStore::new(db.clone());
    let content_id = store
        .insert_content(&NewContent::published("neon-drift", "Neon Drift"))
        .await
        .expect("insert content");
    let version_id = store
        .insert_version(&NewVersion {
            content_id,
            number: "1.0.0",
            attachment: Some(Attachment {
                id: 500,
                file_name: Some("neon-drift-1.0.0.zip".to_string()),
                file_size: Some(4_096),
            }),
            external: None,
            uploaded_at: START_MILLIS,
        })
        .await
        .expect("insert version");
    Seeded {
        content_id,
        version_id,
    }
}

/// Adds an item-level external link to `content_id`.
pub async fn link_externally(db: &Database, content_id: i64, url: &str) {
    SqliteContentStore::new(db.clone())
        .set_external_link(
            content_id,
            Some(&ExternalLink {
                url: url.to_string(),
                label: Some("Mirror".to_string()),
                size: Some("120 MB".to_string()),
            }),
        )
        .await
        .expect("set external link");
}

/// Renders `<h1>{title}</h1>` and counts calls.
#[derive(Debug, Default)]
pub struct CountingRenderer {
    calls: AtomicUsize,
}

impl CountingRenderer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renderer for CountingRenderer {
    async fn render(&self, context: &DownloadContext) -> Result<Vec<u8>, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("<h1>{}</h1>", context.title()).into_bytes())
    }
}
