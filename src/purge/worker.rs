//! Background dispatch of purge work.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::{ContentChange, EdgePurger, PurgeError, PurgePlan, PurgePlanner};
use crate::cache::CacheStore;

/// Default number of queued changes before new ones are dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Plans a change, drops local cache entries and purges the edge.
#[derive(Clone)]
pub struct PurgeExecutor {
    planner: PurgePlanner,
    purger: Arc<dyn EdgePurger>,
    cache: Option<Arc<dyn CacheStore>>,
    timeout: Duration,
}

impl std::fmt::Debug for PurgeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PurgeExecutor")
            .field("planner", &self.planner)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl PurgeExecutor {
    /// Creates an executor. `cache` is the local page store, if any.
    #[must_use]
    pub fn new(
        planner: PurgePlanner,
        purger: Arc<dyn EdgePurger>,
        cache: Option<Arc<dyn CacheStore>>,
        timeout: Duration,
    ) -> Self {
        Self {
            planner,
            purger,
            cache,
            timeout,
        }
    }

    /// Runs one change to completion and returns what was purged.
    ///
    /// Local invalidation failures are logged and skipped; the edge call is
    /// bounded by the executor's timeout.
    ///
    /// # Errors
    ///
    /// Returns [`PurgeError`] if planning or the edge call fails.
    #[instrument(skip(self))]
    pub async fn execute(&self, change: &ContentChange) -> Result<PurgePlan, PurgeError> {
        let plan = self.planner.plan(change).await?;
        if plan.is_empty() {
            return Ok(plan);
        }

        if let Some(cache) = &self.cache {
            for key in &plan.cache_keys {
                if let Err(error) = cache.invalidate(key).await {
                    warn!(cache_key = %key, error = %error, "failed to invalidate local page cache");
                }
            }
        }

        if !plan.urls.is_empty() {
            tokio::time::timeout(self.timeout, self.purger.purge(&plan.urls))
                .await
                .map_err(|_| PurgeError::Timeout(self.timeout))??;
        }
        debug!(urls = plan.urls.len(), "purge complete");
        Ok(plan)
    }
}

/// Fire-and-forget purge propagation on a background task.
///
/// [`PurgePropagator::on_content_changed`] never awaits: it queues the change
/// on a bounded channel and returns. A full queue drops the change with a
/// warning; the page-cache TTL bounds staleness for anything lost.
#[derive(Debug)]
pub struct PurgePropagator {
    sender: mpsc::Sender<ContentChange>,
    worker: JoinHandle<()>,
}

impl PurgePropagator {
    /// Starts the worker on the current Tokio runtime.
    #[must_use]
    pub fn spawn(executor: PurgeExecutor, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(run_worker(executor, receiver));
        info!(capacity, "purge worker started");
        Self { sender, worker }
    }

    /// Queues `change` for purging. Never blocks and never fails the caller.
    pub fn on_content_changed(&self, change: ContentChange) {
        match self.sender.try_send(change) {
            Ok(()) => {}
            Err(TrySendError::Full(change)) => {
                warn!(?change, "purge queue full, dropping change");
            }
            Err(TrySendError::Closed(change)) => {
                warn!(?change, "purge worker stopped, dropping change");
            }
        }
    }

    /// Stops accepting changes and waits for queued ones to finish.
    pub async fn shutdown(self) {
        drop(self.sender);
        if let Err(error) = self.worker.await {
            warn!(error = %error, "purge worker ended abnormally");
        }
    }
}

async fn run_worker(executor: PurgeExecutor, mut receiver: mpsc::Receiver<ContentChange>) {
    while let Some(change) = receiver.recv().await {
        // Failures stay here; the triggering write has already completed
        if let Err(error) = executor.execute(&change).await {
            warn!(?change, error = %error, "purge failed");
        }
    }
    info!("purge worker stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::Database;
    use crate::cache::MemoryCacheStore;
    use crate::clock::{Clock, ManualClock};
    use crate::content::{ContentRepository, NewContent, SqliteContentStore, ThreadRecord};
    use crate::context::SiteUrls;

    #[derive(Debug, Default)]
    struct RecordingPurger {
        calls: Mutex<Vec<Vec<String>>>,
        fail: bool,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl EdgePurger for RecordingPurger {
        async fn purge(&self, urls: &[String]) -> Result<(), PurgeError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.calls.lock().unwrap().push(urls.to_vec());
            if self.fail {
                Err(PurgeError::Status { status: 500 })
            } else {
                Ok(())
            }
        }
    }

    async fn store_with_item() -> (SqliteContentStore, i64) {
        let store = SqliteContentStore::new(Database::new_in_memory().await.unwrap());
        let id = store
            .insert_content(&NewContent::published("neon-drift", "Neon Drift"))
            .await
            .unwrap();
        (store, id)
    }

    fn executor(
        store: SqliteContentStore,
        purger: Arc<RecordingPurger>,
        cache: Option<Arc<dyn CacheStore>>,
    ) -> PurgeExecutor {
        let repository: Arc<dyn ContentRepository> = Arc::new(store);
        PurgeExecutor::new(
            PurgePlanner::new(repository, SiteUrls::new("https://mods.example").unwrap()),
            purger,
            cache,
            Duration::from_secs(12),
        )
    }

    #[tokio::test]
    async fn test_version_update_purges_edge_exactly_once() {
        let (store, id) = store_with_item().await;
        let purger = Arc::new(RecordingPurger::default());
        let propagator = PurgePropagator::spawn(executor(store, Arc::clone(&purger), None), 8);

        propagator.on_content_changed(ContentChange::VersionSaved {
            content_id: id,
            version_id: 42,
        });
        propagator.shutdown().await;

        let calls = purger.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].contains(&"https://mods.example/mods/neon-drift/".to_string()));
        assert!(
            calls[0].contains(&"https://mods.example/mods/neon-drift/download/42/".to_string())
        );
    }

    #[tokio::test]
    async fn test_execute_invalidates_local_cache_keys() {
        let (store, id) = store_with_item().await;
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        let cache = Arc::new(MemoryCacheStore::new(clock));
        cache
            .put("wr:42", b"page", Duration::from_secs(3600))
            .await
            .unwrap();
        let executor = executor(
            store,
            Arc::new(RecordingPurger::default()),
            Some(Arc::clone(&cache) as Arc<dyn CacheStore>),
        );
        let change = ContentChange::VersionSaved {
            content_id: id,
            version_id: 42,
        };

        executor.execute(&change).await.unwrap();
        assert!(cache.get("wr:42").await.unwrap().is_none());
        // A second purge of the same change is a no-op, not an error
        executor.execute(&change).await.unwrap();
    }

    #[tokio::test]
    async fn test_edge_failure_is_swallowed_by_worker() {
        let (store, id) = store_with_item().await;
        let purger = Arc::new(RecordingPurger {
            fail: true,
            ..RecordingPurger::default()
        });
        let propagator = PurgePropagator::spawn(executor(store, Arc::clone(&purger), None), 8);

        propagator.on_content_changed(ContentChange::ContentSaved { content_id: id });
        propagator.on_content_changed(ContentChange::ContentSaved { content_id: id });
        propagator.shutdown().await;

        assert_eq!(purger.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_slow_edge_times_out() {
        let (store, _) = store_with_item().await;
        let purger = Arc::new(RecordingPurger {
            delay: Some(Duration::from_secs(60)),
            ..RecordingPurger::default()
        });
        let executor = executor(store, purger, None);
        // Snapshot plans need no store round-trip, so paused time is safe here
        tokio::time::pause();

        let snapshot = ThreadRecord {
            id: 5,
            slug: "crash-on-load".to_string(),
            section_slug: "support".to_string(),
            title: "Crash on load".to_string(),
            terms: Vec::new(),
        };
        let error = executor
            .execute(&ContentChange::ThreadDeleted { snapshot })
            .await
            .unwrap_err();
        assert!(matches!(error, PurgeError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_on_content_changed_does_not_wait_for_slow_edge() {
        let (store, id) = store_with_item().await;
        let purger = Arc::new(RecordingPurger {
            delay: Some(Duration::from_millis(200)),
            ..RecordingPurger::default()
        });
        let propagator = PurgePropagator::spawn(executor(store, Arc::clone(&purger), None), 1);

        let started = std::time::Instant::now();
        for _ in 0..5 {
            propagator.on_content_changed(ContentChange::ContentSaved { content_id: id });
        }
        assert!(started.elapsed() < Duration::from_millis(100));
        propagator.shutdown().await;
        assert!(!purger.calls.lock().unwrap().is_empty());
    }
}
