use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use tokio::sync::Notify;
use tracing::{debug, warn};

use super::CacheKey;

/// Process-wide registry, created empty on first use
static GLOBAL: OnceLock<InvalidationRegistry> = OnceLock::new();

/// Outcome of an invalidation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Opened a new batch and woke the worker.
    Scheduled,
    /// Folded into a batch that is already waiting to run.
    Coalesced,
    /// No keys were subscribed; nothing to do.
    Empty,
}

/// Keys drained from the registry, ready to refresh.
#[derive(Debug, Default)]
pub struct InvalidationBatch {
    pub keys: Vec<CacheKey>,
    /// Keys that failed to parse and were dropped.
    pub skipped: usize,
}

impl InvalidationBatch {
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    table: BTreeMap<String, BTreeSet<String>>,
    pending: BTreeSet<String>,
    batch_open: bool,
}

/// Entity name → subscribed cache keys.
///
/// Clone is cheap and shares the same table. No lock is ever held across an
/// await, so any interleaving of subscribe/unsubscribe/invalidate is safe.
#[derive(Debug, Clone, Default)]
pub struct InvalidationRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    wake: Arc<Notify>,
}

impl InvalidationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by the whole process.
    pub fn global() -> &'static InvalidationRegistry {
        GLOBAL.get_or_init(InvalidationRegistry::new)
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Keep `key` fresh whenever `entity` changes. Returns whether it was new.
    pub fn subscribe(&self, entity: &str, key: impl Into<String>) -> bool {
        let key = key.into();
        let added = self
            .lock()
            .table
            .entry(entity.to_string())
            .or_default()
            .insert(key.clone());
        if added {
            debug!(entity, key = %key, "Subscribed cache key");
        }
        added
    }

    /// Stop refreshing `key` for `entity`. Unknown keys are a no-op.
    pub fn unsubscribe(&self, entity: &str, key: &str) -> bool {
        let mut inner = self.lock();
        let Some(keys) = inner.table.get_mut(entity) else {
            return false;
        };
        let removed = keys.remove(key);
        if keys.is_empty() {
            inner.table.remove(entity);
        }
        if removed {
            debug!(entity, key, "Unsubscribed cache key");
        }
        removed
    }

    /// Queue every key subscribed under `entity` for refresh.
    pub fn invalidate_entity(&self, entity: &str) -> BatchState {
        let mut inner = self.lock();
        let keys: Vec<String> = match inner.table.get(entity) {
            Some(keys) => keys.iter().cloned().collect(),
            None => {
                debug!(entity, "Invalidated entity has no subscribers");
                return BatchState::Empty;
            }
        };
        debug!(entity, count = keys.len(), "Invalidating entity");
        inner.pending.extend(keys);
        self.open_batch(&mut inner)
    }

    /// Queue every subscribed key of every entity.
    pub fn invalidate_all(&self) -> BatchState {
        let mut inner = self.lock();
        let keys: Vec<String> = inner.table.values().flatten().cloned().collect();
        if keys.is_empty() {
            return BatchState::Empty;
        }
        debug!(entities = inner.table.len(), count = keys.len(), "Invalidating all entities");
        inner.pending.extend(keys);
        self.open_batch(&mut inner)
    }

    fn open_batch(&self, inner: &mut RegistryInner) -> BatchState {
        if inner.batch_open {
            return BatchState::Coalesced;
        }
        inner.batch_open = true;
        self.wake.notify_one();
        BatchState::Scheduled
    }

    /// Drain the pending batch. Unparseable keys are logged and skipped
    /// individually.
    pub fn take_batch(&self) -> InvalidationBatch {
        let pending = {
            let mut inner = self.lock();
            inner.batch_open = false;
            std::mem::take(&mut inner.pending)
        };

        let mut batch = InvalidationBatch::default();
        for raw in pending {
            match CacheKey::parse(&raw) {
                Ok(key) => batch.keys.push(key),
                Err(e) => {
                    warn!(key = %raw, error = %e, "Skipping malformed cache key");
                    batch.skipped += 1;
                }
            }
        }
        batch
    }

    /// Resolves once a batch has been scheduled.
    pub(crate) async fn batch_ready(&self) {
        self.wake.notified().await;
    }

    pub fn subscriptions(&self, entity: &str) -> Vec<String> {
        self.lock()
            .table
            .get(entity)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn entities(&self) -> Vec<String> {
        self.lock().table.keys().cloned().collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.lock().pending.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn students_registry() -> InvalidationRegistry {
        let registry = InvalidationRegistry::new();
        registry.subscribe("students", r#"["students",{"page":1}]"#);
        registry.subscribe("students", r#"["students",{"page":2}]"#);
        registry.subscribe("students", r#"["student",7]"#);
        registry
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let registry = InvalidationRegistry::new();
        assert!(registry.subscribe("students", r#"["students"]"#));
        assert!(!registry.subscribe("students", r#"["students"]"#));
        assert_eq!(registry.subscriptions("students").len(), 1);
    }

    #[test]
    fn test_unsubscribe_unknown_is_noop() {
        let registry = InvalidationRegistry::new();
        assert!(!registry.unsubscribe("students", r#"["students"]"#));

        registry.subscribe("students", r#"["students"]"#);
        assert!(registry.unsubscribe("students", r#"["students"]"#));
        assert!(!registry.unsubscribe("students", r#"["students"]"#));
        assert!(registry.entities().is_empty());
    }

    #[test]
    fn test_invalidate_entity_batches_once_per_tick() {
        let registry = students_registry();

        assert_eq!(registry.invalidate_entity("students"), BatchState::Scheduled);
        assert_eq!(registry.invalidate_entity("students"), BatchState::Coalesced);
        assert_eq!(registry.invalidate_entity("students"), BatchState::Coalesced);

        let batch = registry.take_batch();
        assert_eq!(batch.keys.len(), 3);
        assert_eq!(batch.skipped, 0);
        assert!(!registry.has_pending());

        // Next invalidation opens a fresh batch
        assert_eq!(registry.invalidate_entity("students"), BatchState::Scheduled);
    }

    #[test]
    fn test_invalidate_unknown_entity_is_empty() {
        let registry = students_registry();
        assert_eq!(registry.invalidate_entity("invoices"), BatchState::Empty);
        assert!(registry.take_batch().is_empty());
    }

    #[test]
    fn test_malformed_key_skipped_not_fatal() {
        let registry = students_registry();
        registry.subscribe("students", "not-json");

        registry.invalidate_entity("students");
        let batch = registry.take_batch();
        assert_eq!(batch.keys.len(), 3);
        assert_eq!(batch.skipped, 1);
    }

    #[test]
    fn test_invalidate_all_covers_every_entity() {
        let registry = students_registry();
        registry.subscribe("invoices", r#"["invoices"]"#);
        registry.subscribe("invoices", r#"["student",7]"#);

        assert_eq!(registry.invalidate_all(), BatchState::Scheduled);
        let batch = registry.take_batch();
        // Shared key is refreshed once
        assert_eq!(batch.keys.len(), 4);
    }

    #[test]
    fn test_clones_share_table() {
        let registry = InvalidationRegistry::new();
        let other = registry.clone();
        other.subscribe("students", r#"["students"]"#);
        assert_eq!(registry.entities(), vec!["students".to_string()]);
    }

    #[test]
    fn test_global_is_shared() {
        let a = InvalidationRegistry::global();
        let b = InvalidationRegistry::global();
        assert!(std::ptr::eq(a, b));
    }
}
