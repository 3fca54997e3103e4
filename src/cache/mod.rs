//! Generic named cache store with TTL and priority-aware eviction.
//!
//! Each [`CacheStore`] is bounded by entry count and/or an estimated
//! byte budget. Eviction prefers expired entries, then ranks live ones
//! by `(priority ascending, last access ascending)`: the oldest entry in
//! the lowest priority tier goes first, and [`CachePriority::Critical`]
//! entries are only evicted when nothing lower remains. TTL expiry is
//! lazy (checked on access) with an explicit [`CacheStore::sweep`] for
//! periodic cleanup.
//!
//! Misconfiguration is rejected when the store is created; ordinary
//! misses are never errors.

pub mod registry;
pub mod tier;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Error, Result};
use tier::CacheTier;

/// Time-to-live policy for a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTtl {
    /// Expire this long after insertion.
    After(Duration),
    /// Never expire. For user-authored data that must not silently
    /// disappear; still subject to capacity-driven eviction.
    Never,
}

/// Eviction tier of a cache entry. Lower tiers are evicted first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum CachePriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Configuration for one cache store.
///
/// At least one of `max_entries`/`max_bytes` must be set. A byte budget
/// requires a `weigher` so entry sizes can be estimated.
pub struct CacheConfig<V> {
    /// Maximum resident entry count.
    pub max_entries: Option<usize>,
    /// Maximum total estimated bytes.
    pub max_bytes: Option<u64>,
    /// TTL applied when `put` has no override.
    pub default_ttl: CacheTtl,
    /// Per-value size estimate in bytes. When absent every entry
    /// weighs 1 (entry-count accounting only).
    pub weigher: Option<fn(&V) -> u64>,
    /// Optional persistent cold tier.
    pub tier: Option<CacheTier<V>>,
}

impl<V> Default for CacheConfig<V> {
    fn default() -> Self {
        Self {
            max_entries: Some(1024),
            max_bytes: None,
            default_ttl: CacheTtl::After(Duration::from_secs(600)),
            weigher: None,
            tier: None,
        }
    }
}

impl<V> Clone for CacheConfig<V> {
    fn clone(&self) -> Self {
        Self {
            max_entries: self.max_entries,
            max_bytes: self.max_bytes,
            default_ttl: self.default_ttl,
            weigher: self.weigher,
            tier: self.tier.clone(),
        }
    }
}

impl<V> std::fmt::Debug for CacheConfig<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheConfig")
            .field("max_entries", &self.max_entries)
            .field("max_bytes", &self.max_bytes)
            .field("default_ttl", &self.default_ttl)
            .field("has_weigher", &self.weigher.is_some())
            .field("has_tier", &self.tier.is_some())
            .finish()
    }
}

impl<V> CacheConfig<V> {
    /// Validates this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no capacity is set, a capacity is
    /// zero, the default TTL is zero, or `max_bytes` is set without a
    /// `weigher`.
    pub fn validate(&self) -> Result<()> {
        if self.max_entries.is_none() && self.max_bytes.is_none() {
            return Err(Error::Config(
                "cache capacity required: set max_entries or max_bytes".into(),
            ));
        }
        if self.max_entries == Some(0) {
            return Err(Error::Config("max_entries must be greater than 0".into()));
        }
        if self.max_bytes == Some(0) {
            return Err(Error::Config("max_bytes must be greater than 0".into()));
        }
        if let CacheTtl::After(ttl) = self.default_ttl {
            if ttl.is_zero() {
                return Err(Error::Config("default_ttl must be greater than zero".into()));
            }
        }
        if self.max_bytes.is_some() && self.weigher.is_none() {
            return Err(Error::Config("max_bytes requires a weigher".into()));
        }
        Ok(())
    }
}

/// Counters exposed by [`CacheStore::metrics`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheMetrics {
    pub entry_count: usize,
    pub total_bytes: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    /// Capacity evictions plus expired-entry removals.
    pub eviction_count: u64,
    /// Hits over total lookups; `0.0` before any lookup.
    pub hit_rate: f64,
}

struct CacheEntry<V> {
    value: V,
    #[allow(dead_code)] // bookkeeping, reported via future metrics detail
    created_at: Instant,
    expires_at: Option<Instant>,
    priority: CachePriority,
    access_count: u64,
    last_accessed_at: Instant,
    size_estimate: u64,
}

struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    total_bytes: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// A named, bounded, TTL-aware cache for one value type.
///
/// All operations synchronize internally; no caller ever holds the lock
/// across a suspension point because every operation is synchronous.
pub struct CacheStore<V> {
    name: String,
    config: CacheConfig<V>,
    inner: Mutex<Inner<V>>,
}

impl<V> std::fmt::Debug for CacheStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore").field("name", &self.name).finish_non_exhaustive()
    }
}

impl<V: Clone + Send + Sync + 'static> CacheStore<V> {
    /// Creates a store named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the configuration is invalid.
    pub fn new(name: impl Into<String>, config: CacheConfig<V>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                total_bytes: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn tier_key(&self, key: &str) -> String {
        format!("{}:{key}", self.name)
    }

    /// Looks up `key`.
    ///
    /// Returns `None` for missing or expired entries (an expired entry
    /// is removed on the spot). A hit bumps the entry's access count and
    /// recency. On a memory miss a configured cold tier is consulted;
    /// a tier hit is promoted back into memory (with the store's default
    /// TTL and priority) and counts as a hit.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.lock();
        let now = Instant::now();

        let expired = inner
            .entries
            .get(key)
            .is_some_and(|e| e.expires_at.is_some_and(|t| t <= now));
        if expired {
            if let Some(entry) = inner.entries.remove(key) {
                inner.total_bytes = inner.total_bytes.saturating_sub(entry.size_estimate);
                inner.evictions += 1;
                if let Some(tier) = &self.config.tier {
                    tier.store.delete(&self.tier_key(key));
                }
            }
        }

        let hit = if let Some(entry) = inner.entries.get_mut(key) {
            entry.access_count += 1;
            entry.last_accessed_at = now;
            Some(entry.value.clone())
        } else {
            None
        };
        if let Some(value) = hit {
            inner.hits += 1;
            return Some(value);
        }

        if let Some(tier) = &self.config.tier {
            if let Some(bytes) = tier.store.get(&self.tier_key(key)) {
                if let Some(value) = (tier.decode)(&bytes) {
                    inner.hits += 1;
                    self.insert_locked(
                        &mut inner,
                        key.to_string(),
                        value.clone(),
                        self.config.default_ttl,
                        CachePriority::default(),
                    );
                    return Some(value);
                }
            }
        }

        inner.misses += 1;
        None
    }

    /// Inserts `value` with the store's default TTL and normal priority.
    pub fn put(&self, key: impl Into<String>, value: V) {
        self.put_with(key, value, None, CachePriority::default());
    }

    /// Inserts `value`, evicting victims first if capacity requires it.
    ///
    /// `ttl_override` takes precedence over the store default. An entry
    /// whose own size exceeds the store's capacity is not cached (the
    /// capacity invariant always holds when this returns).
    pub fn put_with(
        &self,
        key: impl Into<String>,
        value: V,
        ttl_override: Option<CacheTtl>,
        priority: CachePriority,
    ) {
        let key = key.into();
        let ttl = ttl_override.unwrap_or(self.config.default_ttl);
        let mut inner = self.lock();
        self.insert_locked(&mut inner, key, value, ttl, priority);
    }

    fn insert_locked(
        &self,
        inner: &mut Inner<V>,
        key: String,
        value: V,
        ttl: CacheTtl,
        priority: CachePriority,
    ) {
        let size = self.config.weigher.map_or(1, |weigh| weigh(&value));

        // Replacement frees the old entry's budget before fit checks.
        if let Some(old) = inner.entries.remove(&key) {
            inner.total_bytes = inner.total_bytes.saturating_sub(old.size_estimate);
        }

        while !self.would_fit(inner, size) {
            if !self.evict_one(inner) {
                break;
            }
        }
        if !self.would_fit(inner, size) {
            tracing::debug!(cache = %self.name, %key, size, "entry exceeds cache capacity, not cached");
            return;
        }

        let now = Instant::now();
        let expires_at = match ttl {
            CacheTtl::After(ttl) => Some(now + ttl),
            CacheTtl::Never => None,
        };
        inner.total_bytes += size;
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                created_at: now,
                expires_at,
                priority,
                access_count: 0,
                last_accessed_at: now,
                size_estimate: size,
            },
        );
    }

    fn would_fit(&self, inner: &Inner<V>, incoming_size: u64) -> bool {
        let entries_ok = self
            .config
            .max_entries
            .is_none_or(|max| inner.entries.len() + 1 <= max);
        let bytes_ok = self
            .config
            .max_bytes
            .is_none_or(|max| inner.total_bytes + incoming_size <= max);
        entries_ok && bytes_ok
    }

    /// Evicts one victim: any expired entry first, otherwise the least
    /// recently used entry of the lowest priority tier. Live victims are
    /// written through to the cold tier. Returns `false` when empty.
    fn evict_one(&self, inner: &mut Inner<V>) -> bool {
        let now = Instant::now();
        let victim_key = {
            let mut expired: Option<&String> = None;
            let mut best: Option<(&String, CachePriority, Instant)> = None;
            for (key, entry) in &inner.entries {
                if entry.expires_at.is_some_and(|t| t <= now) {
                    expired = Some(key);
                    break;
                }
                let candidate = (key, entry.priority, entry.last_accessed_at);
                best = match best {
                    None => Some(candidate),
                    Some(current) => {
                        if (candidate.1, candidate.2) < (current.1, current.2) {
                            Some(candidate)
                        } else {
                            Some(current)
                        }
                    }
                };
            }
            expired.or(best.map(|(key, _, _)| key)).cloned()
        };

        let Some(key) = victim_key else {
            return false;
        };
        let Some(entry) = inner.entries.remove(&key) else {
            return false;
        };
        inner.total_bytes = inner.total_bytes.saturating_sub(entry.size_estimate);
        inner.evictions += 1;

        let live = entry.expires_at.is_none_or(|t| t > now);
        if live {
            if let Some(tier) = &self.config.tier {
                if let Some(bytes) = (tier.encode)(&entry.value) {
                    tier.store.set(&self.tier_key(&key), bytes);
                }
            }
        }
        true
    }

    /// Removes `key` from memory and, if configured, from the cold tier.
    pub fn remove(&self, key: &str) {
        let mut inner = self.lock();
        if let Some(entry) = inner.entries.remove(key) {
            inner.total_bytes = inner.total_bytes.saturating_sub(entry.size_estimate);
        }
        if let Some(tier) = &self.config.tier {
            tier.store.delete(&self.tier_key(key));
        }
    }

    /// Drops all resident entries (and their cold-tier copies).
    ///
    /// Entries that live only in the tier (evicted earlier, never
    /// promoted back) are unknown to the store and stay behind; callers
    /// needing a full purge manage the backing store directly.
    pub fn clear(&self) {
        let mut inner = self.lock();
        if let Some(tier) = &self.config.tier {
            for key in inner.entries.keys() {
                tier.store.delete(&self.tier_key(key));
            }
        }
        inner.entries.clear();
        inner.total_bytes = 0;
    }

    /// Removes every expired entry; returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let mut inner = self.lock();
        let now = Instant::now();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at.is_some_and(|t| t <= now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            if let Some(entry) = inner.entries.remove(key) {
                inner.total_bytes = inner.total_bytes.saturating_sub(entry.size_estimate);
                inner.evictions += 1;
            }
            if let Some(tier) = &self.config.tier {
                tier.store.delete(&self.tier_key(key));
            }
        }
        expired.len()
    }

    /// Writes every live entry through to the cold tier (teardown
    /// support); returns how many were written. No-op without a tier.
    pub fn flush(&self) -> usize {
        let inner = self.lock();
        let Some(tier) = &self.config.tier else {
            return 0;
        };
        let now = Instant::now();
        let mut written = 0;
        for (key, entry) in &inner.entries {
            if entry.expires_at.is_some_and(|t| t <= now) {
                continue;
            }
            if let Some(bytes) = (tier.encode)(&entry.value) {
                tier.store.set(&self.tier_key(key), bytes);
                written += 1;
            }
        }
        written
    }

    /// Current counters. `hit_rate` is hits over total lookups.
    pub fn metrics(&self) -> CacheMetrics {
        let inner = self.lock();
        let lookups = inner.hits + inner.misses;
        CacheMetrics {
            entry_count: inner.entries.len(),
            total_bytes: inner.total_bytes,
            hit_count: inner.hits,
            miss_count: inner.misses,
            eviction_count: inner.evictions,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
        }
    }
}
