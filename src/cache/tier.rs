//! Optional persistent backing tier for a cache store.
//!
//! The engine treats the cold tier as an opaque byte-keyed store; the
//! byte format is caller-defined through the [`CacheTier`] codec. A
//! store with a tier writes live entries through on capacity eviction
//! and consults the tier on a memory miss, promoting hits back into
//! memory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// An opaque key/value byte store backing a cache's cold tier.
///
/// Implementations are supplied by the host application (e.g. a disk
/// store). Operations are infallible from the cache's point of view: a
/// failed read is simply a miss, and implementations handle their own
/// write durability.
pub trait PersistentStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn set(&self, key: &str, bytes: Vec<u8>);
    fn delete(&self, key: &str);
}

/// A persistent store plus the caller-defined codec for one value type.
///
/// `encode`/`decode` returning `None` means the value is skipped (not
/// persisted, or treated as a tier miss).
pub struct CacheTier<V> {
    pub store: Arc<dyn PersistentStore>,
    pub encode: fn(&V) -> Option<Vec<u8>>,
    pub decode: fn(&[u8]) -> Option<V>,
}

impl<V> Clone for CacheTier<V> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            encode: self.encode,
            decode: self.decode,
        }
    }
}

impl<V> std::fmt::Debug for CacheTier<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheTier").finish_non_exhaustive()
    }
}

/// Builds a [`CacheTier`] that persists values as JSON.
///
/// Convenience for serde-friendly value types; callers with bespoke
/// formats construct [`CacheTier`] directly.
pub fn json_tier<V: Serialize + DeserializeOwned>(store: Arc<dyn PersistentStore>) -> CacheTier<V> {
    CacheTier {
        store,
        encode: |value: &V| serde_json::to_vec(value).ok(),
        decode: |bytes: &[u8]| serde_json::from_slice(bytes).ok(),
    }
}

/// In-memory [`PersistentStore`], used in tests and as a reference
/// implementation.
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        match self.map.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl PersistentStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().get(key).cloned()
    }

    fn set(&self, key: &str, bytes: Vec<u8>) {
        self.lock().insert(key.to_string(), bytes);
    }

    fn delete(&self, key: &str) {
        self.lock().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        store.set("k", vec![1, 2, 3]);
        assert_eq!(store.get("k"), Some(vec![1, 2, 3]));
        assert_eq!(store.len(), 1);
        store.delete("k");
        assert!(store.get("k").is_none());
    }

    #[test]
    fn json_tier_encodes_and_decodes() {
        let tier: CacheTier<Vec<String>> = json_tier(Arc::new(MemoryStore::new()));
        let value = vec!["dragon".to_string(), "quest".to_string()];
        let bytes = (tier.encode)(&value).expect("encode should succeed");
        let decoded = (tier.decode)(&bytes).expect("decode should succeed");
        assert_eq!(decoded, value);
    }

    #[test]
    fn json_tier_decode_rejects_garbage() {
        let tier: CacheTier<Vec<String>> = json_tier(Arc::new(MemoryStore::new()));
        assert!((tier.decode)(b"not json").is_none());
    }
}
