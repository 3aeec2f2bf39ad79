//! Read-through cache of resolution results.
//!
//! Entries are keyed by `(feature, requested context, visibility options)`
//! and hold the filtered result, including `None`. Each feature carries a
//! generation counter: a resolve records the generation before reading the
//! store and [`ResolutionCache::fill`] refuses the insert if a mutation bumped
//! it in between, so a racing resolve never re-inserts a stale value.
//!
//! The cache does not observe changes to the context hierarchy. Callers that
//! re-parent contexts must [`clear`](ResolutionCache::clear) it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use super::{ResolveOptions, ResolvedFlag};
use crate::context::ContextRef;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub feature: String,
    pub context: ContextRef,
    pub override_hidden: bool,
    pub hide_inherited_enabled: bool,
}

impl CacheKey {
    pub fn new(feature: &str, context: ContextRef, options: ResolveOptions) -> Self {
        Self {
            feature: feature.to_string(),
            context,
            override_hidden: options.override_hidden,
            hide_inherited_enabled: options.hide_inherited_enabled,
        }
    }
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<CacheKey, Option<ResolvedFlag>>,
    generations: HashMap<String, u64>,
}

#[derive(Debug, Default)]
pub struct ResolutionCache {
    inner: RwLock<Inner>,
    max_entries: Option<usize>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            max_entries: Some(max_entries),
            ..Self::default()
        }
    }

    /// Cached result. The outer `Option` is hit/miss, the inner one is the
    /// resolution result itself.
    pub fn get(&self, key: &CacheKey) -> Option<Option<ResolvedFlag>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        match inner.entries.get(key) {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Current generation of `feature`. Read it before touching the store.
    pub fn generation(&self, feature: &str) -> u64 {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.generations.get(feature).copied().unwrap_or(0)
    }

    /// Insert `value` unless `key.feature` was invalidated after `generation`
    /// was read. Returns whether the entry was stored.
    pub fn fill(&self, key: CacheKey, generation: u64, value: Option<ResolvedFlag>) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let current = inner.generations.get(&key.feature).copied().unwrap_or(0);
        if current != generation {
            tracing::debug!(feature = %key.feature, generation, current, "Skipped stale cache fill");
            return false;
        }

        inner.entries.insert(key, value);
        if let Some(max_entries) = self.max_entries {
            while inner.entries.len() > max_entries {
                // No recency tracking; drop an arbitrary entry.
                match inner.entries.keys().next().cloned() {
                    Some(evict) => {
                        inner.entries.remove(&evict);
                    }
                    None => break,
                }
            }
        }
        true
    }

    /// Drop every entry of `feature` and bump its generation.
    pub fn invalidate_feature(&self, feature: &str) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *inner.generations.entry(feature.to_string()).or_insert(0) += 1;
        let before = inner.entries.len();
        inner.entries.retain(|key, _| key.feature != feature);
        tracing::debug!(
            feature,
            dropped = before - inner.entries.len(),
            "Invalidated cached resolutions"
        );
    }

    /// Drop everything and bump every known generation.
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let features: Vec<String> = inner.entries.keys().map(|k| k.feature.clone()).collect();
        for feature in features {
            inner.generations.entry(feature).or_insert(0);
        }
        for generation in inner.generations.values_mut() {
            *generation += 1;
        }
        inner.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}
