//! Purge propagation on content changes.
//!
//! A change is planned into the set of public URLs and local cache keys it
//! can make stale, then evicted on a background worker so the write that
//! triggered it never waits on the edge provider.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use waiting_room::Database;
//! use waiting_room::content::SqliteContentStore;
//! use waiting_room::context::SiteUrls;
//! use waiting_room::purge::{
//!     ContentChange, NoopEdgePurger, PurgeExecutor, PurgePlanner, PurgePropagator,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new_in_memory().await?;
//! let planner = PurgePlanner::new(
//!     Arc::new(SqliteContentStore::new(db)),
//!     SiteUrls::new("https://mods.example")?,
//! );
//! let executor = PurgeExecutor::new(planner, Arc::new(NoopEdgePurger), None, Duration::from_secs(12));
//! let propagator = PurgePropagator::spawn(executor, 256);
//!
//! propagator.on_content_changed(ContentChange::for_content(7, Some(42)));
//! propagator.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod edge;
mod error;
mod plan;
mod worker;

pub use edge::{EdgePurger, HttpEdgePurger, NoopEdgePurger};
pub use error::PurgeError;
pub use plan::{PurgePlan, PurgePlanner};
pub use worker::{DEFAULT_QUEUE_CAPACITY, PurgeExecutor, PurgePropagator};

use serde::Serialize;

use crate::content::ThreadRecord;

/// A content-store event that may leave cached pages stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentChange {
    /// A version was added or edited.
    VersionSaved {
        /// Owning content item.
        content_id: i64,
        /// Changed version.
        version_id: i64,
    },
    /// Item-level data changed (status, title, external link).
    ContentSaved {
        /// Changed content item.
        content_id: i64,
    },
    /// A discussion thread was created or edited.
    ThreadSaved {
        /// Changed thread.
        thread_id: i64,
    },
    /// A discussion thread was removed; the snapshot is taken before deletion.
    ThreadDeleted {
        /// Thread as it was.
        snapshot: ThreadRecord,
    },
}

impl ContentChange {
    /// Change for a content item, narrowed to one version when known.
    #[must_use]
    pub fn for_content(content_id: i64, affected_version_id: Option<i64>) -> Self {
        match affected_version_id {
            Some(version_id) => Self::VersionSaved {
                content_id,
                version_id,
            },
            None => Self::ContentSaved { content_id },
        }
    }
}
