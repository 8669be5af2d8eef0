//! Per-partition memoization for window operators
//!
//! Operators such as `$rank` or `$minMaxScaler` compute one result for the
//! whole partition and then read a single slot per document. The cache
//! keeps that series keyed by output field. `$setWindowFields` owns one
//! cache per partition and drops it when the partition is done; an entry is
//! evicted after the last document of the partition reads it, or as soon as
//! computing it fails.

use crate::error::Result;
use crate::value::Value;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Cache statistics
#[derive(Debug, Default)]
pub struct WindowCacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl WindowCacheStats {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

/// Memoized partition-wide series, keyed by output field
#[derive(Debug, Default)]
pub struct WindowCache {
    entries: Mutex<HashMap<String, Arc<Vec<Value>>>>,
    stats: WindowCacheStats,
}

impl WindowCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached series for `field`, computing it on first use.
    ///
    /// A failed computation leaves no entry behind.
    pub fn get_or_compute<F>(&self, field: &str, compute: F) -> Result<Arc<Vec<Value>>>
    where
        F: FnOnce() -> Result<Vec<Value>>,
    {
        if let Some(series) = self.entries.lock().get(field) {
            self.stats.record_hit();
            return Ok(series.clone());
        }
        self.stats.record_miss();
        match compute() {
            Ok(series) => {
                let series = Arc::new(series);
                self.entries.lock().insert(field.to_string(), series.clone());
                Ok(series)
            }
            Err(e) => {
                self.evict(field);
                warn!(field, error = %e, "window cache entry evicted after failed computation");
                Err(e)
            }
        }
    }

    /// Drop the entry for `field`
    pub fn evict(&self, field: &str) -> bool {
        let removed = self.entries.lock().remove(field).is_some();
        if removed {
            self.stats.record_eviction();
        }
        removed
    }

    /// Drop every entry
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        for _ in entries.drain() {
            self.stats.record_eviction();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn stats(&self) -> &WindowCacheStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[test]
    fn test_computes_once() {
        let cache = WindowCache::new();
        let mut calls = 0;
        for _ in 0..3 {
            let series = cache
                .get_or_compute("rank", || {
                    calls += 1;
                    Ok(vec![Value::Int64(1)])
                })
                .unwrap();
            assert_eq!(series.len(), 1);
        }
        assert_eq!(calls, 1);
        assert_eq!(cache.stats().hits(), 2);
        assert_eq!(cache.stats().misses(), 1);
    }

    #[test]
    fn test_failure_leaves_no_entry() {
        let cache = WindowCache::new();
        let err = cache
            .get_or_compute("scaled", || Err(EngineError::assertion("boom")))
            .unwrap_err();
        assert_eq!(err.message(), "boom");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_evict_and_clear() {
        let cache = WindowCache::new();
        cache.get_or_compute("a", || Ok(Vec::new())).unwrap();
        cache.get_or_compute("b", || Ok(Vec::new())).unwrap();
        assert!(cache.evict("a"));
        assert!(!cache.evict("a"));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().evictions(), 2);
    }
}
