//! Named-cache registry: one shared store per namespace.
//!
//! Unrelated features (search results, content metadata, translation
//! results) share eviction and metrics infrastructure while staying
//! logically isolated, each under its own name with its own value type.
//! Creation is idempotent and atomic: concurrent `get_or_create` calls
//! for one name can never race into duplicate stores.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};

use super::{CacheConfig, CacheMetrics, CacheStore};

/// Object-safe view of a typed cache store, for operations that do not
/// need the value type (metrics, maintenance, teardown).
pub trait CacheHandle: Send + Sync {
    fn name(&self) -> &str;
    fn metrics(&self) -> CacheMetrics;
    fn clear(&self);
    fn sweep(&self) -> usize;
    fn flush(&self) -> usize;
}

impl<V: Clone + Send + Sync + 'static> CacheHandle for CacheStore<V> {
    fn name(&self) -> &str {
        CacheStore::name(self)
    }

    fn metrics(&self) -> CacheMetrics {
        CacheStore::metrics(self)
    }

    fn clear(&self) {
        CacheStore::clear(self);
    }

    fn sweep(&self) -> usize {
        CacheStore::sweep(self)
    }

    fn flush(&self) -> usize {
        CacheStore::flush(self)
    }
}

struct Slot {
    /// The typed store, for `get_or_create` downcasts.
    store: Arc<dyn Any + Send + Sync>,
    /// The untyped view, for registry-wide maintenance.
    handle: Arc<dyn CacheHandle>,
}

/// Registry of named cache stores, constructed explicitly and shared
/// via `Arc`.
#[derive(Default)]
pub struct CacheRegistry {
    slots: Mutex<HashMap<String, Slot>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Returns the store named `name`, creating it on first call.
    ///
    /// Creation is atomic under the registry lock; every caller for the
    /// same name receives the same instance for the process lifetime.
    /// On subsequent calls `config` is ignored (idempotent creation).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` is invalid (first call) or
    /// if `name` already holds a store with a different value type.
    pub fn get_or_create<V: Clone + Send + Sync + 'static>(
        &self,
        name: &str,
        config: CacheConfig<V>,
    ) -> Result<Arc<CacheStore<V>>> {
        let mut slots = self.lock();
        if let Some(slot) = slots.get(name) {
            return slot.store.clone().downcast::<CacheStore<V>>().map_err(|_| {
                Error::Config(format!(
                    "cache '{name}' is already registered with a different value type"
                ))
            });
        }

        let store = Arc::new(CacheStore::new(name, config)?);
        tracing::debug!(cache = name, "cache store created");
        slots.insert(
            name.to_string(),
            Slot {
                store: store.clone(),
                handle: store.clone(),
            },
        );
        Ok(store)
    }

    /// Metrics for the store named `name`, or `None` if absent.
    pub fn metrics(&self, name: &str) -> Option<CacheMetrics> {
        self.lock().get(name).map(|slot| slot.handle.metrics())
    }

    /// Names of all registered stores, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Clears every store's resident entries.
    pub fn clear_all(&self) {
        for slot in self.lock().values() {
            slot.handle.clear();
        }
    }

    /// Sweeps expired entries out of every store; returns the total
    /// dropped.
    pub fn sweep_all(&self) -> usize {
        self.lock().values().map(|slot| slot.handle.sweep()).sum()
    }

    /// Flushes every store's live entries to its cold tier (if any);
    /// returns the total written. Used on engine teardown.
    pub fn flush_all(&self) -> usize {
        self.lock().values().map(|slot| slot.handle.flush()).sum()
    }
}
