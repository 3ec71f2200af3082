//! The recurring drain job.

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use super::{DownloadQueue, DrainStats};
use crate::cache::SqliteCacheStore;
use crate::scheduler::{HandlerError, JobHandler};
use crate::token::TokenService;

/// Name under which the drain job is persisted.
pub const DRAIN_JOB_NAME: &str = "drain_download_queue";

/// Upper bound on batches per run so one run cannot monopolize the store.
const MAX_BATCHES_PER_RUN: u32 = 100;

/// Drains the download queue, then prunes expired token state and cached
/// pages.
#[derive(Debug, Clone)]
pub struct DownloadQueueDrain {
    queue: DownloadQueue,
    tokens: Option<TokenService>,
    cache: Option<SqliteCacheStore>,
    batch_size: u32,
}

impl DownloadQueueDrain {
    /// Creates a drain that claims `batch_size` events at a time.
    #[must_use]
    pub fn new(queue: DownloadQueue, batch_size: u32) -> Self {
        Self {
            queue,
            tokens: None,
            cache: None,
            batch_size: batch_size.max(1),
        }
    }

    /// Also prunes expired tokens, permissions and rate-limit rows.
    #[must_use]
    pub fn with_token_pruning(mut self, tokens: TokenService) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Also prunes expired page-cache rows.
    #[must_use]
    pub fn with_cache_pruning(mut self, cache: SqliteCacheStore) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Runs batches until the queue is empty or the per-run cap is hit.
    ///
    /// # Errors
    ///
    /// Returns [`super::QueueError`] if a batch fails; earlier batches stay
    /// committed.
    #[instrument(skip(self), fields(batch_size = self.batch_size))]
    pub async fn drain(&self) -> Result<DrainStats, super::QueueError> {
        let mut total = DrainStats::default();
        for _ in 0..MAX_BATCHES_PER_RUN {
            let batch = self.queue.drain_batch(self.batch_size).await?;
            total.events += batch.events;
            total.counters += batch.counters;
            if batch.events < u64::from(self.batch_size) {
                break;
            }
        }
        Ok(total)
    }
}

#[async_trait]
impl JobHandler for DownloadQueueDrain {
    async fn run(&self) -> Result<(), HandlerError> {
        let drained = self.drain().await?;

        // Pruning is housekeeping; a failure here must not fail the drain
        if let Some(tokens) = &self.tokens {
            match tokens.prune_expired().await {
                Ok(stats) if stats.total() > 0 => info!(pruned = stats.total(), "pruned token state"),
                Ok(_) => {}
                Err(error) => warn!(error = %error, "token pruning failed"),
            }
        }
        if let Some(cache) = &self.cache
            && let Err(error) = cache.prune_expired().await
        {
            warn!(error = %error, "page cache pruning failed");
        }

        if drained.events > 0 {
            info!(events = drained.events, counters = drained.counters, "download queue drained");
        }
        Ok(())
    }
}
