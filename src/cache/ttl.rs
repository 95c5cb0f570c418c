use crate::runtime::memory::{CleanupId, MemoryPressureMonitor};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub size: usize,
    pub max_size: usize,
    pub ttl_secs: u64,
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
    seq: u64,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= self.ttl
    }
}

struct CacheInner<V> {
    entries: HashMap<String, Entry<V>>,
    /// Insertion order: seq -> key. The smallest seq is the oldest entry.
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl<V> CacheInner<V> {
    fn remove(&mut self, key: &str) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }
}

/// Process-lifetime memoization with per-entry TTL and a size bound.
///
/// Expired entries are dropped lazily on read, or eagerly when a full cache
/// needs room. When no entry has expired the oldest insertion is evicted.
pub struct TtlCache<V> {
    inner: Mutex<CacheInner<V>>,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_seq: 0,
            }),
            ttl,
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.lock();
        let now = Instant::now();
        if inner.entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            inner.remove(key);
        }
        let hit = inner.entries.get(key).map(|entry| entry.value.clone());
        drop(inner);

        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.ttl);
    }

    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let mut inner = self.lock();
        let now = Instant::now();

        if inner.remove(&key).is_none() && inner.entries.len() >= self.max_entries {
            let purged = inner.purge_expired(now);
            let mut evicted = 0usize;
            while inner.entries.len() >= self.max_entries {
                let Some((_, oldest)) = inner.order.pop_first() else {
                    break;
                };
                inner.entries.remove(&oldest);
                evicted += 1;
            }
            if purged + evicted > 0 {
                tracing::trace!(purged, evicted, "cache made room");
            }
        }

        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner.order.insert(seq, key.clone());
        inner.entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
                ttl,
                seq,
            },
        );
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.lock().remove(key).map(|entry| entry.value)
    }

    /// Drops every entry and returns how many there were.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let count = inner.entries.len();
        inner.entries.clear();
        inner.order.clear();
        count
    }

    pub fn purge_expired(&self) -> usize {
        self.lock().purge_expired(Instant::now())
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            size: self.len(),
            max_size: self.max_entries,
            ttl_secs: self.ttl.as_secs(),
        }
    }
}

impl<V: Clone + Send + 'static> TtlCache<V> {
    /// Registers [`clear`](Self::clear) as a memory-pressure cleanup.
    ///
    /// The monitor only holds a weak reference, so a dropped cache reports
    /// zero freed entries instead of staying alive.
    pub fn register_with(self: &Arc<Self>, monitor: &MemoryPressureMonitor, name: &str) -> CleanupId {
        let weak = Arc::downgrade(self);
        monitor.register_cleanup(name, move || {
            Ok(weak.upgrade().map_or(0, |cache| cache.clear()))
        })
    }
}
