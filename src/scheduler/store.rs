//! Job stores: where recurring jobs and their leases live.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{FromRow, Row};
use tracing::{debug, instrument};

use super::SchedulerError;
use crate::clock::{Clock, duration_millis};
use crate::db::Database;

/// A claimed run of a job. Holding it means no other instance runs the job
/// until the lease is completed or expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLease {
    /// Job name.
    pub name: String,
    /// Configured interval.
    pub interval: Duration,
    /// Lease expiry, unix milliseconds.
    pub lease_until: i64,
}

/// Persisted job row.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ScheduledJob {
    /// Job name.
    pub name: String,
    /// Interval in seconds.
    pub interval_secs: i64,
    /// Next due time, unix milliseconds.
    pub next_run_at: i64,
    /// Current lease expiry, if a run is in flight.
    pub lease_until: Option<i64>,
    /// Last completed run.
    pub last_run_at: Option<i64>,
}

/// Storage seam for recurring jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Whether jobs survive restarts and are shared across instances.
    fn is_durable(&self) -> bool;

    /// Creates the job if absent. Returns `true` when a row was created.
    async fn ensure_job(&self, name: &str, interval: Duration) -> Result<bool, SchedulerError>;

    /// Leases the job if it is due and not already leased.
    async fn claim_due(&self, name: &str, lease: Duration) -> Result<Option<JobLease>, SchedulerError>;

    /// Releases `lease` and schedules the next run one interval from now.
    async fn complete(&self, lease: &JobLease) -> Result<(), SchedulerError>;
}

/// Job store over the `scheduled_jobs` table.
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl SqliteJobStore {
    /// Creates a store over `db`.
    #[must_use]
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Reads a job row.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Database`] if the query fails.
    pub async fn job(&self, name: &str) -> Result<Option<ScheduledJob>, SchedulerError> {
        let job = sqlx::query_as::<_, ScheduledJob>(
            r"SELECT name, interval_secs, next_run_at, lease_until, last_run_at
              FROM scheduled_jobs WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(job)
    }

    /// Number of job rows with `name` (at most one).
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Database`] if the query fails.
    pub async fn count(&self, name: &str) -> Result<i64, SchedulerError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM scheduled_jobs WHERE name = ?")
            .bind(name)
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    fn is_durable(&self) -> bool {
        true
    }

    #[instrument(skip(self))]
    async fn ensure_job(&self, name: &str, interval: Duration) -> Result<bool, SchedulerError> {
        let now = self.clock.now_millis();
        let interval_secs = i64::try_from(interval.as_secs()).unwrap_or(i64::MAX);

        let created = sqlx::query(
            r"INSERT INTO scheduled_jobs (name, interval_secs, next_run_at, created_at)
              VALUES (?, ?, ?, ?)
              ON CONFLICT(name) DO NOTHING",
        )
        .bind(name)
        .bind(interval_secs)
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await?
        .rows_affected()
            == 1;

        if !created {
            sqlx::query(
                "UPDATE scheduled_jobs SET interval_secs = ? WHERE name = ? AND interval_secs != ?",
            )
            .bind(interval_secs)
            .bind(name)
            .bind(interval_secs)
            .execute(self.db.pool())
            .await?;
        }
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn claim_due(&self, name: &str, lease: Duration) -> Result<Option<JobLease>, SchedulerError> {
        let now = self.clock.now_millis();
        // Atomic UPDATE...RETURNING: at most one instance wins the lease
        let row = sqlx::query(
            r"UPDATE scheduled_jobs
              SET lease_until = ?1
              WHERE name = ?2
                AND next_run_at <= ?3
                AND (lease_until IS NULL OR lease_until <= ?3)
              RETURNING name, interval_secs, lease_until",
        )
        .bind(now.saturating_add(duration_millis(lease)))
        .bind(name)
        .bind(now)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(|row| {
            let interval_secs: i64 = row.get("interval_secs");
            JobLease {
                name: row.get("name"),
                interval: Duration::from_secs(u64::try_from(interval_secs).unwrap_or(1)),
                lease_until: row.get("lease_until"),
            }
        }))
    }

    #[instrument(skip(self, lease), fields(job = %lease.name))]
    async fn complete(&self, lease: &JobLease) -> Result<(), SchedulerError> {
        let now = self.clock.now_millis();
        let result = sqlx::query(
            r"UPDATE scheduled_jobs
              SET lease_until = NULL, last_run_at = ?1, next_run_at = ?1 + interval_secs * 1000
              WHERE name = ?2 AND lease_until = ?3",
        )
        .bind(now)
        .bind(&lease.name)
        .bind(lease.lease_until)
        .execute(self.db.pool())
        .await?;
        if result.rows_affected() == 0 {
            debug!("lease was lost before completion");
        }
        Ok(())
    }
}

/// Stand-in when no durable backend is configured. Never schedules anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullJobStore;

#[async_trait]
impl JobStore for NullJobStore {
    fn is_durable(&self) -> bool {
        false
    }

    async fn ensure_job(&self, _name: &str, _interval: Duration) -> Result<bool, SchedulerError> {
        Ok(false)
    }

    async fn claim_due(&self, _name: &str, _lease: Duration) -> Result<Option<JobLease>, SchedulerError> {
        Ok(None)
    }

    async fn complete(&self, _lease: &JobLease) -> Result<(), SchedulerError> {
        Ok(())
    }
}
