//! Analysis cache
//!
//! Bounded least-recently-used map from email identifier to the last
//! analysis received for it. Persisted in the key/value store as a list
//! ordered from least to most recently used, so recency survives reloads.

use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{AnalysisResult, EmailIdentifier};
use crate::store::{self, KeyValueStore};

/// Store key holding the persisted cache
pub const CACHE_KEY: &str = "phishing_analysis_cache";

/// Default number of analyses kept
pub const DEFAULT_CAPACITY: usize = 50;

/// Persisted form of one entry
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    id: EmailIdentifier,
    result: AnalysisResult,
}

/// LRU cache of analysis results
#[derive(Debug)]
pub struct AnalysisCache {
    entries: LruCache<EmailIdentifier, AnalysisResult>,
}

impl AnalysisCache {
    /// Create an empty cache; a zero capacity is raised to one
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Restore a cache persisted with [`AnalysisCache::persist`]
    ///
    /// A stored value that does not decode is discarded and the cache starts
    /// empty; only a failing store is an error.
    pub fn load(store: &dyn KeyValueStore, capacity: usize) -> Result<Self> {
        let mut cache = Self::new(capacity);
        let entries: Vec<CacheEntry> = match store.get(CACHE_KEY)? {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!("Discarding unreadable analysis cache: {}", e);
                Vec::new()
            }),
            None => Vec::new(),
        };
        let stored = entries.len();

        for entry in entries {
            cache.entries.put(entry.id, entry.result);
        }

        debug!("Loaded {} cached analyses ({} stored)", cache.len(), stored);
        Ok(cache)
    }

    /// Write the cache, least recently used first
    pub fn persist(&self, store: &dyn KeyValueStore) -> Result<()> {
        let entries: Vec<CacheEntry> = self
            .entries
            .iter()
            .rev()
            .map(|(id, result)| CacheEntry {
                id: id.clone(),
                result: result.clone(),
            })
            .collect();
        store::save(store, CACHE_KEY, &entries)
    }

    /// Look up an analysis, marking it as recently used
    pub fn get(&mut self, id: &EmailIdentifier) -> Option<AnalysisResult> {
        self.entries.get(id).cloned()
    }

    pub fn contains(&self, id: &EmailIdentifier) -> bool {
        self.entries.contains(id)
    }

    /// Store an analysis; returns the identifier evicted to make room, if any
    pub fn insert(&mut self, id: EmailIdentifier, result: AnalysisResult) -> Option<EmailIdentifier> {
        match self.entries.push(id.clone(), result) {
            Some((evicted, _)) if evicted != id => {
                debug!("Evicted cached analysis for {}", evicted);
                Some(evicted)
            }
            _ => None,
        }
    }

    /// Identifiers from most to least recently used
    pub fn identifiers(&self) -> Vec<EmailIdentifier> {
        self.entries.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }
}

impl Default for AnalysisCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
