//! `SQLite`-backed download-event queue and per-version counters.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sqlx::Row;
use tracing::{debug, instrument};

use super::{DownloadChannel, QueueError};
use crate::clock::{Clock, duration_millis};
use crate::context::VersionRef;
use crate::db::Database;

/// How long a drain may hold claimed events before another drain may take them.
const CLAIM_LEASE: Duration = Duration::from_secs(120);

/// Result of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Events folded into counters and deleted.
    pub events: u64,
    /// Distinct `(content, version)` counters touched.
    pub counters: u64,
}

/// Durable queue of completed download authorizations.
///
/// Writers append one event per authorized transfer; the drain job folds
/// events into `download_counts` in batches. Events survive restarts, so a
/// missed drain only delays counting.
#[derive(Debug, Clone)]
pub struct DownloadQueue {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl DownloadQueue {
    /// Creates a queue over `db`.
    #[must_use]
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Appends a download event and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the insert fails.
    #[instrument(skip(self), fields(version = %version_ref, channel = channel.as_str()))]
    pub async fn enqueue(
        &self,
        content_id: i64,
        version_ref: VersionRef,
        channel: DownloadChannel,
    ) -> Result<i64, QueueError> {
        let id: i64 = sqlx::query_scalar(
            r"INSERT INTO download_events (content_id, version_ref, channel, created_at)
              VALUES (?, ?, ?, ?)
              RETURNING id",
        )
        .bind(content_id)
        .bind(version_ref.to_string())
        .bind(channel.as_str())
        .bind(self.clock.now_millis())
        .fetch_one(self.db.pool())
        .await?;
        Ok(id)
    }

    /// Events not yet drained, claimed or not.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    pub async fn pending(&self) -> Result<i64, QueueError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM download_events")
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }

    /// Drained downloads recorded for one version.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    pub async fn count_for_version(
        &self,
        content_id: i64,
        version_ref: VersionRef,
    ) -> Result<i64, QueueError> {
        let count: Option<i64> = sqlx::query_scalar(
            "SELECT downloads FROM download_counts WHERE content_id = ? AND version_ref = ?",
        )
        .bind(content_id)
        .bind(version_ref.to_string())
        .fetch_optional(self.db.pool())
        .await?;
        Ok(count.unwrap_or(0))
    }

    /// Claims up to `batch_size` events, folds them into counters and
    /// deletes them.
    ///
    /// Claiming is a single `UPDATE ... RETURNING`, so concurrent drains
    /// never take the same event. Deletion is conditioned on the claim, so
    /// a drain whose claim expired and was taken over counts nothing twice.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if a query fails or an event is unreadable.
    #[instrument(skip(self))]
    pub async fn drain_batch(&self, batch_size: u32) -> Result<DrainStats, QueueError> {
        let now = self.clock.now_millis();
        let claimed_until = now.saturating_add(duration_millis(CLAIM_LEASE));

        let rows = sqlx::query(
            r"UPDATE download_events
              SET claimed_until = ?1
              WHERE id IN (
                  SELECT id FROM download_events
                  WHERE claimed_until IS NULL OR claimed_until <= ?2
                  ORDER BY id
                  LIMIT ?3
              )
              RETURNING id, content_id, version_ref",
        )
        .bind(claimed_until)
        .bind(now)
        .bind(i64::from(batch_size))
        .fetch_all(self.db.pool())
        .await?;

        if rows.is_empty() {
            return Ok(DrainStats::default());
        }

        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.get("id");
            let raw: String = row.get("version_ref");
            let version_ref = raw
                .parse::<VersionRef>()
                .map_err(|reason| QueueError::CorruptEvent { id, reason })?;
            claimed.push((id, row.get::<i64, _>("content_id"), version_ref));
        }

        let mut tx = self.db.pool().begin().await?;
        let mut folded: HashMap<(i64, VersionRef), i64> = HashMap::new();
        let mut events = 0u64;
        for (id, content_id, version_ref) in claimed {
            let deleted = sqlx::query("DELETE FROM download_events WHERE id = ? AND claimed_until = ?")
                .bind(id)
                .bind(claimed_until)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            if deleted == 1 {
                *folded.entry((content_id, version_ref)).or_default() += 1;
                events += 1;
            }
        }

        for ((content_id, version_ref), downloads) in &folded {
            sqlx::query(
                r"INSERT INTO download_counts (content_id, version_ref, downloads)
                  VALUES (?, ?, ?)
                  ON CONFLICT(content_id, version_ref)
                  DO UPDATE SET downloads = downloads + excluded.downloads",
            )
            .bind(content_id)
            .bind(version_ref.to_string())
            .bind(downloads)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        let stats = DrainStats {
            events,
            counters: folded.len() as u64,
        };
        debug!(events = stats.events, counters = stats.counters, "drained download events");
        Ok(stats)
    }
}
