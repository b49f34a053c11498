//! TTL + bounded cache for report responses.
//!
//! Avoids re-issuing identical read queries while a previous answer is still
//! fresh. Entries are keyed by a canonical `(method, params)` string so two
//! parameter sets that differ only in ordering share one entry. Expiry is
//! lazy: an entry found stale on read is removed by that read. When full, the
//! earliest-inserted entry is evicted (insertion order, not access order).

use crate::api::params::{ParamValue, Params};
use crate::config::CacheConfig;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Canonical cache key for a `(method, params)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Serialize `{method, params}` with params sorted by key.
    pub fn new(method: &str, params: &Params) -> Self {
        #[derive(Serialize)]
        struct Canonical<'a> {
            method: &'a str,
            params: BTreeMap<&'a str, &'a ParamValue>,
        }

        let canonical = Canonical {
            method,
            params: params.iter().map(|(k, v)| (k.as_str(), v)).collect(),
        };
        // Serializing strings and scalars into a String cannot fail.
        let key = serde_json::to_string(&canonical).unwrap_or_else(|_| method.to_string());
        Self(key)
    }

    /// The canonical JSON text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Cache metadata reported alongside every reporting result.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMetadata {
    pub hit: bool,
    /// Remaining lifetime on a hit, full TTL after a store, zero on a miss.
    #[serde(serialize_with = "as_millis")]
    pub ttl: Duration,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Result of a [`ReportingCache::get`].
#[derive(Debug, Clone)]
pub struct CacheLookup<V> {
    pub value: Option<V>,
    pub metadata: CacheMetadata,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    /// Insertion sequence, used for oldest-first eviction.
    inserted: u64,
}

/// TTL cache keyed by [`CacheKey`], bounded to `max_size` entries.
#[derive(Debug)]
pub struct ReportingCache<V = serde_json::Value> {
    entries: HashMap<CacheKey, CacheEntry<V>>,
    ttl: Duration,
    max_size: usize,
    next_seq: u64,
    hits: u64,
    misses: u64,
}

impl<V: Clone> ReportingCache<V> {
    /// Empty cache with the configured TTL and capacity.
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            ttl: config.ttl,
            max_size: config.max_size.max(1),
            next_seq: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Look up a fresh entry. Stale entries are removed and reported as misses.
    pub fn get(&mut self, key: &CacheKey) -> CacheLookup<V> {
        let now = Instant::now();
        let found = self.entries.get(key).map(|entry| {
            (entry.expires_at > now).then(|| (entry.value.clone(), entry.expires_at - now))
        });
        let fresh = match found {
            Some(Some(fresh)) => Some(fresh),
            Some(None) => {
                trace!("cache expired: {}", key.as_str());
                self.entries.remove(key);
                None
            }
            None => None,
        };

        match fresh {
            Some((value, remaining)) => {
                self.hits += 1;
                trace!("cache hit: {} ({}ms left)", key.as_str(), remaining.as_millis());
                CacheLookup {
                    value: Some(value),
                    metadata: CacheMetadata {
                        hit: true,
                        ttl: remaining,
                    },
                }
            }
            None => {
                self.misses += 1;
                trace!("cache miss: {}", key.as_str());
                CacheLookup {
                    value: None,
                    metadata: CacheMetadata {
                        hit: false,
                        ttl: Duration::ZERO,
                    },
                }
            }
        }
    }

    /// Store a value. Evicts the earliest-inserted entry first when full.
    pub fn set(&mut self, key: CacheKey, value: V) -> CacheMetadata {
        if self.entries.len() >= self.max_size {
            self.evict_oldest();
        }

        let expires_at = Instant::now() + self.ttl;
        match self.entries.get_mut(&key) {
            // Overwriting keeps the original insertion position.
            Some(entry) => {
                entry.value = value;
                entry.expires_at = expires_at;
            }
            None => {
                let inserted = self.next_seq;
                self.next_seq += 1;
                self.entries.insert(
                    key,
                    CacheEntry {
                        value,
                        expires_at,
                        inserted,
                    },
                );
            }
        }

        CacheMetadata {
            hit: false,
            ttl: self.ttl,
        }
    }

    /// Whether an entry is stored for `key`, fresh or not.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Drop every entry. Hit and miss counters are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Stored entries, including stale ones not yet swept by a lookup.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lifetime given to each stored entry.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Maximum number of entries kept before eviction.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Lookups that returned a fresh entry.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Lookups that found nothing or an expired entry.
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Hit rate as a fraction (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest_key) = self
            .entries
            .iter()
            .min_by_key(|(_, v)| v.inserted)
            .map(|(k, _)| k.clone())
        {
            trace!("cache evict: {}", oldest_key.as_str());
            self.entries.remove(&oldest_key);
        }
    }
}

impl<V: Clone> Default for ReportingCache<V> {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}
