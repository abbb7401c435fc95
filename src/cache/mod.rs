//! Bounded LRU caches for chain data.
//!
//! # Data Flow
//! ```text
//! Catch-up engine:
//!     → blocks cache (lookup before every fetch, populate after)
//!     → transactions cache (populate with every operation seen)
//!
//! Host receipt queries:
//!     → transactions cache (read only)
//! ```
//!
//! # Design Decisions
//! - Capacity fixed at construction; zero is a construction error
//! - Internally synchronized; callers never see the underlying map
//! - Blocks are cached by hash always and by level only once final,
//!   so a reorganization can never serve a stale block for a level

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::CacheConfig;
use crate::error::{ConnectorError, ConnectorResult};
use crate::observability::metrics;
use crate::tezos::rpc::Block;
use crate::tezos::types::{BlockHash, OpHash};
use crate::transactions::TransactionReceipt;

/// A thread-safe least-recently-used cache.
///
/// `get` refreshes recency; inserting past capacity drops the least
/// recently used entry.
#[derive(Debug)]
pub struct LruCache<K: Hash + Eq, V> {
    name: &'static str,
    inner: Mutex<lru::LruCache<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K: Hash + Eq, V: Clone> LruCache<K, V> {
    /// Create a cache holding at most `capacity` entries.
    pub fn new(name: &'static str, capacity: usize) -> ConnectorResult<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or(ConnectorError::CacheInit(name))?;
        Ok(Self {
            name,
            inner: Mutex::new(lru::LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Look up a key, marking it most recently used on a hit.
    pub fn get(&self, key: &K) -> Option<V> {
        let value = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned();

        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        metrics::record_cache_lookup(self.name, value.is_some());
        value
    }

    /// Insert or replace a value, evicting the least recently used entry if full.
    pub fn put(&self, key: K, value: V) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(key, value);
    }

    /// Check presence without touching recency.
    pub fn contains(&self, key: &K) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cap()
            .get()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Key for the block cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockRef {
    /// Only populated for blocks past the finality depth.
    Level(u64),
    Hash(BlockHash),
}

/// The two caches shared by the catch-up engine and the host API.
#[derive(Debug)]
pub struct ChainCaches {
    pub blocks: LruCache<BlockRef, Arc<Block>>,
    pub transactions: LruCache<OpHash, TransactionReceipt>,
}

impl ChainCaches {
    pub fn new(config: &CacheConfig) -> ConnectorResult<Self> {
        Ok(Self {
            blocks: LruCache::new("block", config.block_cache_size)?,
            transactions: LruCache::new("transaction", config.tx_cache_size)?,
        })
    }

    /// Cache a fetched block. Level keys are only written for final blocks.
    pub fn insert_block(&self, block: Arc<Block>, is_final: bool) {
        if is_final {
            self.blocks
                .put(BlockRef::Level(block.header.level), block.clone());
        }
        self.blocks.put(BlockRef::Hash(block.hash.clone()), block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_capacity_fails() {
        let result = LruCache::<u64, u64>::new("block", 0);
        assert!(matches!(result, Err(ConnectorError::CacheInit("block"))));
    }

    #[test]
    fn test_evicts_least_recently_used() {
        for capacity in 1..=8usize {
            let cache = LruCache::new("test", capacity).unwrap();
            for key in 0..capacity {
                cache.put(key, key * 10);
            }
            cache.put(capacity, 0);

            assert_eq!(cache.len(), capacity);
            assert!(!cache.contains(&0), "capacity {} kept oldest key", capacity);
            for key in 1..=capacity {
                assert!(cache.contains(&key));
            }
        }
    }

    #[test]
    fn test_get_refreshes_recency() {
        let cache = LruCache::new("test", 3).unwrap();
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("c", 3);

        assert_eq!(cache.get(&"a"), Some(1));
        cache.put("d", 4);

        assert!(cache.contains(&"a"));
        assert!(!cache.contains(&"b"));
        assert_eq!(cache.get(&"b"), None);
    }

    #[test]
    fn test_stats() {
        let cache = LruCache::new("test", 2).unwrap();
        cache.put(1u8, 1u8);
        cache.get(&1);
        cache.get(&2);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(LruCache::new("test", 64).unwrap());
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..1000u64 {
                        cache.put(t * 1000 + i, i);
                        cache.get(&(t * 1000 + i / 2));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 64);
    }

    #[test]
    fn test_chain_caches_init_errors() {
        let config = CacheConfig {
            block_cache_size: 10,
            tx_cache_size: 0,
        };
        let err = ChainCaches::new(&config).unwrap_err();
        assert!(err.to_string().contains("transaction"));
    }
}
