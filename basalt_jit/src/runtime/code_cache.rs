//! Code cache for compiled functions.
//!
//! Stores compiled code keyed by function identity with least-recently-used
//! eviction under a byte budget. The recency list and the size counter sit
//! behind one mutex that each operation holds from start to finish, so an
//! evict-then-insert sequence is never observed half done.

use crate::codegen::CompiledCode;
use basalt_core::FunctionId;
use lru::LruCache;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Ids evicted by one insert.
pub type EvictedIds = SmallVec<[FunctionId; 4]>;

#[derive(Debug)]
struct CacheInner {
    /// Most recently used at the front.
    entries: LruCache<FunctionId, Arc<CompiledCode>>,
    /// Sum of live entries' sizes.
    total_size: usize,
}

impl CacheInner {
    fn pop_lru(&mut self) -> Option<(FunctionId, Arc<CompiledCode>)> {
        let (id, code) = self.entries.pop_lru()?;
        self.total_size -= code.size();
        Some((id, code))
    }
}

// =============================================================================
// Code Cache
// =============================================================================

/// A size-bounded LRU cache of compiled code.
///
/// Thread-safe via internal locking.
#[derive(Debug)]
pub struct CodeCache {
    inner: Mutex<CacheInner>,
    /// Maximum total code size in bytes.
    max_size: usize,
    /// Lookup hit counter.
    hits: AtomicU64,
    /// Lookup miss counter.
    misses: AtomicU64,
    /// Insert counter.
    insertions: AtomicU64,
    /// Eviction counter.
    evictions: AtomicU64,
}

impl CodeCache {
    /// Create a new code cache with the given maximum size in bytes.
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::unbounded(),
                total_size: 0,
            }),
            max_size,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            insertions: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up compiled code, marking it most recently used.
    #[inline]
    pub fn lookup(&self, id: FunctionId) -> Option<Arc<CompiledCode>> {
        let result = self.inner.lock().entries.get(&id).cloned();

        if result.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Look up compiled code without touching recency or statistics.
    #[inline]
    pub fn peek(&self, id: FunctionId) -> Option<Arc<CompiledCode>> {
        self.inner.lock().entries.peek(&id).cloned()
    }

    /// Check if `code` is the entry currently installed for `id`.
    pub fn is_installed(&self, id: FunctionId, code: &Arc<CompiledCode>) -> bool {
        self.inner
            .lock()
            .entries
            .peek(&id)
            .is_some_and(|current| Arc::ptr_eq(current, code))
    }

    /// Insert compiled code as most recently used.
    ///
    /// An existing entry for `id` is replaced. Least recently used entries
    /// are evicted until the new code fits; if the code alone exceeds the
    /// budget it ends up as the only entry. Returns the evicted ids, not
    /// counting a replaced entry for `id`.
    pub fn insert(&self, id: FunctionId, code: impl Into<Arc<CompiledCode>>) -> EvictedIds {
        let code = code.into();
        let code_size = code.size();
        let mut evicted = EvictedIds::new();

        let mut inner = self.inner.lock();

        if let Some(old) = inner.entries.pop(&id) {
            inner.total_size -= old.size();
        }

        while inner.total_size + code_size > self.max_size {
            let Some((victim, victim_code)) = inner.pop_lru() else {
                break;
            };
            self.evictions.fetch_add(1, Ordering::Relaxed);
            trace!(
                target: "basalt::jit::code_cache",
                function = %victim,
                bytes = victim_code.size(),
                "evicted"
            );
            evicted.push(victim);
        }

        inner.entries.push(id, code);
        inner.total_size += code_size;
        drop(inner);

        self.insertions.fetch_add(1, Ordering::Relaxed);
        evicted
    }

    /// Evict the least recently used entry, returning the bytes freed.
    pub fn evict(&self) -> usize {
        self.evict_entry().map_or(0, |(_, code)| code.size())
    }

    /// Evict the least recently used entry, returning it.
    pub fn evict_entry(&self) -> Option<(FunctionId, Arc<CompiledCode>)> {
        let evicted = self.inner.lock().pop_lru();
        if let Some((id, code)) = &evicted {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            trace!(
                target: "basalt::jit::code_cache",
                function = %id,
                bytes = code.size(),
                "evicted"
            );
        }
        evicted
    }

    /// Remove compiled code from the cache.
    pub fn remove(&self, id: FunctionId) -> Option<Arc<CompiledCode>> {
        let mut inner = self.inner.lock();
        let removed = inner.entries.pop(&id);
        if let Some(code) = &removed {
            inner.total_size -= code.size();
        }
        removed
    }

    /// Check for an entry without touching its recency.
    #[inline]
    pub fn contains(&self, id: FunctionId) -> bool {
        self.inner.lock().entries.contains(&id)
    }

    /// Total size of cached code in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.inner.lock().total_size
    }

    /// Number of cached functions.
    #[inline]
    pub fn count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Check if the cache is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Configured budget in bytes.
    #[inline]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Cached ids from most to least recently used.
    pub fn recency_order(&self) -> Vec<FunctionId> {
        self.inner.lock().entries.iter().map(|(id, _)| *id).collect()
    }

    /// Clear the entire cache.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.total_size = 0;
    }

    /// Get cache statistics.
    #[inline]
    pub fn stats(&self) -> CodeCacheStats {
        CodeCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics for the code cache.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CodeCacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of insertions.
    pub insertions: u64,
    /// Number of evictions.
    pub evictions: u64,
}

impl CodeCacheStats {
    /// Calculate hit rate.
    #[inline]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
