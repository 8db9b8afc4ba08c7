use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{CacheKey, InvalidationRegistry};

/// The data-fetch cache: refetches whatever is stored under a key.
#[async_trait]
pub trait CacheRefresher: Send + Sync {
    async fn refresh(&self, key: &CacheKey) -> anyhow::Result<()>;
}

/// Background task that turns scheduled batches into refreshes.
///
/// Each batch is deferred past the tick that scheduled it, so a burst of
/// invalidations in one tick lands in a single batch, and its refreshes run
/// concurrently rather than one after another on the caller's stack.
pub struct InvalidationWorker {
    handle: JoinHandle<()>,
}

impl InvalidationWorker {
    pub fn spawn(registry: InvalidationRegistry, refresher: Arc<dyn CacheRefresher>) -> Self {
        let handle = tokio::spawn(async move {
            info!("Invalidation worker started");
            loop {
                registry.batch_ready().await;
                tokio::task::yield_now().await;
                Self::run_batch(&registry, refresher.as_ref()).await;
            }
        });
        Self { handle }
    }

    async fn run_batch(registry: &InvalidationRegistry, refresher: &dyn CacheRefresher) {
        let batch = registry.take_batch();
        if batch.is_empty() {
            return;
        }
        debug!(count = batch.keys.len(), skipped = batch.skipped, "Refreshing invalidated keys");

        let results = join_all(batch.keys.iter().map(|key| refresher.refresh(key))).await;
        for (key, result) in batch.keys.iter().zip(results) {
            if let Err(e) = result {
                warn!(key = %key, error = %e, "Cache refresh failed");
            }
        }
    }

    pub fn shutdown(self) {
        self.handle.abort();
        debug!("Invalidation worker stopped");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingRefresher {
        refreshed: Mutex<Vec<String>>,
    }

    impl RecordingRefresher {
        fn keys(&self) -> Vec<String> {
            self.refreshed.lock().map(|k| k.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl CacheRefresher for RecordingRefresher {
        async fn refresh(&self, key: &CacheKey) -> anyhow::Result<()> {
            if key.root() == Some("broken") {
                anyhow::bail!("upstream unavailable");
            }
            if let Ok(mut refreshed) = self.refreshed.lock() {
                refreshed.push(key.to_string());
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_refreshes_each_key_once() {
        let registry = InvalidationRegistry::new();
        registry.subscribe("students", r#"["students",{"page":1}]"#);
        registry.subscribe("students", r#"["students",{"page":2}]"#);
        registry.subscribe("students", r#"["student",7]"#);
        registry.subscribe("students", "{corrupt");

        let refresher = Arc::new(RecordingRefresher::default());
        let worker = InvalidationWorker::spawn(registry.clone(), refresher.clone());

        registry.invalidate_entity("students");
        registry.invalidate_entity("students");
        registry.invalidate_entity("students");
        // Nothing runs on the invalidating tick
        assert!(refresher.keys().is_empty());

        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut keys = refresher.keys();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                r#"["student",7]"#.to_string(),
                r#"["students",{"page":1}]"#.to_string(),
                r#"["students",{"page":2}]"#.to_string(),
            ]
        );
        worker.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_does_not_block_others() {
        let registry = InvalidationRegistry::new();
        registry.subscribe("invoices", r#"["broken"]"#);
        registry.subscribe("invoices", r#"["invoices"]"#);

        let refresher = Arc::new(RecordingRefresher::default());
        let worker = InvalidationWorker::spawn(registry.clone(), refresher.clone());

        registry.invalidate_entity("invoices");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(refresher.keys(), vec![r#"["invoices"]"#.to_string()]);

        // The worker keeps serving later batches
        registry.invalidate_all();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(refresher.keys().len(), 2);
        worker.shutdown();
    }
}
