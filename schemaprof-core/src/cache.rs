//! Bounded in-memory cache of table profiles.
//!
//! Entries are charged by [`TableProfile::estimated_size_bytes`] against a
//! byte budget and evicted least-recently-used first. All bookkeeping lives
//! behind one mutex, so concurrent readers and writers always observe a
//! single consistent view.

use crate::models::TableProfile;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// A cached profile and its accounting data.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub table_name: String,
    pub profile: Arc<TableProfile>,
    pub size_bytes: usize,
    pub last_accessed: Instant,
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub size_bytes: usize,
    pub budget_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    stamp: u64,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, Slot>,
    /// Recency index keyed by access stamp, least recently used first
    order: BTreeMap<u64, String>,
    next_stamp: u64,
    size_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheInner {
    fn next_stamp(&mut self) -> u64 {
        let stamp = self.next_stamp;
        self.next_stamp = self.next_stamp.saturating_add(1);
        stamp
    }

    fn insert(&mut self, entry: CacheEntry) {
        let stamp = self.next_stamp();
        self.size_bytes = self.size_bytes.saturating_add(entry.size_bytes);
        self.order.insert(stamp, entry.table_name.clone());
        self.entries.insert(entry.table_name.clone(), Slot { entry, stamp });
    }

    fn touch(&mut self, key: &str) {
        let stamp = self.next_stamp();
        if let Some(slot) = self.entries.get_mut(key) {
            self.order.remove(&slot.stamp);
            slot.stamp = stamp;
            self.order.insert(stamp, key.to_string());
        }
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let slot = self.entries.remove(key)?;
        self.order.remove(&slot.stamp);
        self.size_bytes = self.size_bytes.saturating_sub(slot.entry.size_bytes);
        Some(slot.entry)
    }

    fn evict_until_fits(&mut self, incoming: usize, budget: usize) {
        while self.size_bytes.saturating_add(incoming) > budget {
            let Some((_, oldest)) = self.order.pop_first() else {
                break;
            };
            if let Some(Slot { entry, .. }) = self.entries.remove(&oldest) {
                self.size_bytes = self.size_bytes.saturating_sub(entry.size_bytes);
                self.evictions = self.evictions.saturating_add(1);
                tracing::debug!(
                    "Evicted cached profile for '{}' ({} bytes)",
                    oldest,
                    entry.size_bytes
                );
            }
        }
    }
}

/// Thread-safe LRU cache of table profiles bounded by a memory budget.
#[derive(Debug)]
pub struct ProfileCache {
    inner: Mutex<CacheInner>,
    budget_bytes: usize,
}

impl ProfileCache {
    /// Creates an empty cache that holds at most `budget_bytes` of profiles.
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            budget_bytes: budget_bytes.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the cached profile and marks it most recently used.
    pub fn get(&self, table: &str) -> Option<Arc<TableProfile>> {
        let mut inner = self.lock();
        let profile = match inner.entries.get_mut(table) {
            Some(slot) => {
                slot.entry.last_accessed = Instant::now();
                Arc::clone(&slot.entry.profile)
            }
            None => {
                inner.misses = inner.misses.saturating_add(1);
                return None;
            }
        };
        inner.hits = inner.hits.saturating_add(1);
        inner.touch(table);
        Some(profile)
    }

    /// Returns true if a profile is cached for the table, without touching
    /// its recency.
    pub fn contains(&self, table: &str) -> bool {
        self.lock().entries.contains_key(table)
    }

    /// Inserts or replaces the profile for a table, evicting least recently
    /// used entries until it fits.
    ///
    /// Returns false if the profile alone exceeds the budget; it is then not
    /// cached and any older entry for the same table is dropped.
    pub fn put(&self, table: impl Into<String>, profile: impl Into<Arc<TableProfile>>) -> bool {
        let table = table.into();
        let profile = profile.into();
        let size_bytes = profile.estimated_size_bytes();

        let mut inner = self.lock();
        inner.remove(&table);

        if size_bytes > self.budget_bytes {
            tracing::warn!(
                "Profile for '{}' ({} bytes) exceeds cache budget of {} bytes, not caching",
                table,
                size_bytes,
                self.budget_bytes
            );
            return false;
        }

        inner.evict_until_fits(size_bytes, self.budget_bytes);
        inner.insert(CacheEntry {
            table_name: table,
            profile,
            size_bytes,
            last_accessed: Instant::now(),
        });
        true
    }

    /// Removes the cached profile for a table. Returns true if one existed.
    pub fn evict(&self, table: &str) -> bool {
        let removed = self.lock().remove(table).is_some();
        if removed {
            tracing::debug!("Evicted cached profile for removed table '{}'", table);
        }
        removed
    }

    /// Bytes currently charged against the budget.
    pub fn current_size(&self) -> usize {
        self.lock().size_bytes
    }

    /// Configured budget in bytes.
    pub const fn budget_bytes(&self) -> usize {
        self.budget_bytes
    }

    /// Number of cached profiles.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Drops every entry. Counters are kept.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
        inner.size_bytes = 0;
        tracing::info!("Profile cache cleared");
    }

    /// Seeds the cache with previously exported profiles, keyed by their
    /// table name. Returns how many were cached.
    pub fn warm<I>(&self, profiles: I) -> usize
    where
        I: IntoIterator<Item = TableProfile>,
    {
        let mut cached = 0usize;
        for profile in profiles {
            let name = profile.name.clone();
            if self.put(name, profile) {
                cached = cached.saturating_add(1);
            }
        }
        tracing::debug!("Warmed profile cache with {} profile(s)", cached);
        cached
    }

    /// Snapshot of the cache counters.
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            size_bytes: inner.size_bytes,
            budget_bytes: self.budget_bytes,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }
}
