//! Content-addressed memo of transform outcomes
//!
//! Entries are keyed by a SHA-256 over the input text, the classification
//! fingerprint and whether a source map was requested. The store is bounded by
//! capacity and an optional time-to-live, and is safe to share between the
//! dispatcher's threads.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use log::trace;
use moka::sync::Cache;
use sha2::{Digest, Sha256};

use crate::rewriter::TransformResult;

/// Hit and miss counts since creation or the last [`TransformCache::clear`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Bounded, concurrency-safe cache of transform results
#[derive(Debug)]
pub struct TransformCache {
    entries: Cache<String, Arc<TransformResult>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TransformCache {
    /// Create a cache holding at most `capacity` entries
    pub fn new(capacity: u64, time_to_live: Option<Duration>) -> Self {
        let mut builder = Cache::builder().max_capacity(capacity);
        if let Some(ttl) = time_to_live {
            builder = builder.time_to_live(ttl);
        }

        Self {
            entries: builder.build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Compute the cache key of one transform invocation
    pub fn fingerprint(code: &str, classification: &str, with_map: bool) -> String {
        let mut hasher = Sha256::new();
        hasher.update(code.as_bytes());
        hasher.update([0]);
        hasher.update(classification.as_bytes());
        hasher.update(if with_map { b"\0map" } else { b"\0raw" });
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<Arc<TransformResult>> {
        let found = self.entries.get(key);
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Store a result, replacing any previous entry for the key
    pub fn insert(&self, key: String, result: Arc<TransformResult>) {
        self.entries.insert(key, result);
    }

    /// Return the cached result for `key`, computing and storing it on a miss
    ///
    /// Errors from `compute` are returned as is and nothing is stored.
    pub fn get_or_compute<F>(&self, key: &str, compute: F) -> Result<Arc<TransformResult>>
    where
        F: FnOnce() -> Result<TransformResult>,
    {
        if let Some(hit) = self.get(key) {
            trace!("Cache hit for {key}");
            return Ok(hit);
        }

        let result = Arc::new(compute()?);
        self.insert(key.to_owned(), Arc::clone(&result));
        Ok(result)
    }

    /// Drop every entry and reset the counters
    pub fn clear(&self) {
        self.entries.invalidate_all();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
