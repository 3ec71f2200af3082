//! Job registration and the tick loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use super::{JobHandler, JobStore, ScheduleOutcome, SchedulerError};

/// How long a claimed run keeps other instances away.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(300);
/// How often [`QueueScheduler::run_until`] checks for due jobs.
pub const DEFAULT_TICK: Duration = Duration::from_secs(5);

/// Registers recurring jobs and runs them when due.
pub struct QueueScheduler {
    store: Arc<dyn JobStore>,
    handlers: DashMap<String, Arc<dyn JobHandler>>,
    lease: Duration,
}

impl std::fmt::Debug for QueueScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueScheduler")
            .field("durable", &self.store.is_durable())
            .field("jobs", &self.handlers.len())
            .field("lease", &self.lease)
            .finish_non_exhaustive()
    }
}

impl QueueScheduler {
    /// Creates a scheduler over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            handlers: DashMap::new(),
            lease: DEFAULT_LEASE,
        }
    }

    /// Overrides the run lease.
    #[must_use]
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Ensures job `name` runs every `interval` with `handler`.
    ///
    /// Safe to call on every startup: an existing job is left in place
    /// (its interval is updated) and the handler replaces any earlier one.
    /// Without a durable store nothing is scheduled and the outcome says so.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Database`] if the job store fails.
    #[instrument(skip(self, handler))]
    pub async fn ensure_scheduled(
        &self,
        name: &str,
        interval: Duration,
        handler: Arc<dyn JobHandler>,
    ) -> Result<ScheduleOutcome, SchedulerError> {
        if !self.store.is_durable() {
            info!("no durable job backend, not scheduling");
            return Ok(ScheduleOutcome::NoDurableBackend);
        }

        let interval = interval.max(Duration::from_secs(1));
        let created = self.store.ensure_job(name, interval).await?;
        self.handlers.insert(name.to_string(), handler);

        let outcome = if created {
            ScheduleOutcome::Scheduled
        } else {
            ScheduleOutcome::AlreadyScheduled
        };
        info!(%outcome, interval_secs = interval.as_secs(), "job registered");
        Ok(outcome)
    }

    /// Runs every registered job that is due and unleased. Returns the number
    /// of jobs that ran.
    ///
    /// A failing handler is logged and its job is rescheduled normally.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Database`] if the job store fails.
    pub async fn tick(&self) -> Result<usize, SchedulerError> {
        let jobs: Vec<(String, Arc<dyn JobHandler>)> = self
            .handlers
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut ran = 0;
        for (name, handler) in jobs {
            let Some(lease) = self.store.claim_due(&name, self.lease).await? else {
                continue;
            };
            debug!(job = %name, "running job");
            if let Err(source) = handler.run().await {
                let error = SchedulerError::handler(&name, source);
                warn!(error = %error, "job run failed");
            }
            self.store.complete(&lease).await?;
            ran += 1;
        }
        Ok(ran)
    }

    /// Ticks every `every` until `shutdown` resolves.
    ///
    /// Ticks that fall behind are skipped rather than bunched, so a slow run
    /// never overlaps the next one.
    pub async fn run_until<F>(&self, every: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = interval.tick() => {
                    if let Err(error) = self.tick().await {
                        warn!(error = %error, "scheduler tick failed");
                    }
                }
            }
        }
        info!("scheduler stopped");
    }
}
