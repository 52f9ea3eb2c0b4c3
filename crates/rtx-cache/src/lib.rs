//! Bounded keyed cache shared by rtx providers.
//!
//! Each upstream source gets its own [`SourceCache`]: an in-memory LRU with
//! per-entry TTL, an optional disk layer (one checksummed JSON file per key,
//! written atomically), and single-flight coalescing so concurrent demands
//! for one missing key collapse to a single upstream fetch.
//!
//! Invariants:
//! - A hit returns the stored payload unchanged and never an expired entry.
//! - A successful fetch is inserted before any waiter observes the value.
//! - A failed fetch is not cached; the error is shared with all waiters.
//! - Corrupt disk entries (checksum mismatch) are evicted and treated as misses.
//!
//! # Example
//!
//! ```
//! use rtx_cache::{CacheKey, SourceCache};
//!
//! let cache = SourceCache::memory_only("osv", 512);
//! let key = CacheKey::versioned("osv", "npm", "lodash", "4.17.20");
//! assert_eq!(key.stable_string(), "osv:npm:lodash@4.17.20");
//! # let _ = cache;
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::Shared;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

/// Cache key: `(source, ecosystem, name, version-or-wildcard)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Source tag of the provider owning the entry.
    pub source: String,
    /// Ecosystem of the queried package.
    pub ecosystem: String,
    /// Normalized package name.
    pub name: String,
    /// Version, or `None` for whole-package queries.
    pub version: Option<String>,
}

impl CacheKey {
    /// Key for a query about one specific version.
    pub fn versioned(source: &str, ecosystem: &str, name: &str, version: &str) -> Self {
        Self {
            source: source.to_string(),
            ecosystem: ecosystem.to_string(),
            name: name.to_string(),
            version: Some(version.to_string()),
        }
    }

    /// Key for a whole-package query.
    pub fn unversioned(source: &str, ecosystem: &str, name: &str) -> Self {
        Self {
            source: source.to_string(),
            ecosystem: ecosystem.to_string(),
            name: name.to_string(),
            version: None,
        }
    }

    /// Canonical string form: `source:ecosystem:name@version` (or `@*`).
    pub fn stable_string(&self) -> String {
        match &self.version {
            Some(v) => format!("{}:{}:{}@{}", self.source, self.ecosystem, self.name, v),
            None => format!("{}:{}:{}@*", self.source, self.ecosystem, self.name),
        }
    }

    /// On-disk file name: sha256 of the stable string.
    pub fn file_name(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.stable_string().as_bytes());
        format!("{}.json", hex::encode(hasher.finalize()))
    }
}

/// A fetched payload plus an optional TTL override.
///
/// Providers use the override for negative caching: a not-found marker can
/// carry a shorter TTL than a real payload.
#[derive(Debug, Clone)]
pub struct Fetched {
    /// The payload to cache and return.
    pub payload: Value,
    /// Overrides the caller's TTL when set.
    pub ttl_override: Option<Duration>,
}

impl Fetched {
    /// A payload cached under the caller's TTL.
    pub fn payload(payload: Value) -> Self {
        Self {
            payload,
            ttl_override: None,
        }
    }
}

/// Errors surfaced by cache lookups.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The upstream fetch failed; the message is shared by all waiters.
    #[error("fetch failed: {0}")]
    Fetch(String),
}

/// Counters exposed by the diagnostics command.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
    corrupt: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatsSnapshot {
    /// Lookups answered from memory or disk.
    pub hits: u64,
    /// Lookups that required an upstream fetch.
    pub misses: u64,
    /// Lookups that joined an in-flight fetch instead of starting one.
    pub coalesced: u64,
    /// Entries evicted by the LRU bound.
    pub evictions: u64,
    /// Disk entries discarded after a checksum mismatch.
    pub corrupt: u64,
}

impl CacheStats {
    fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            corrupt: self.corrupt.load(Ordering::Relaxed),
        }
    }
}

/// On-disk entry layout. The checksum covers the serialized payload.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    checksum: String,
    fetched_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    payload: Value,
}

/// In-memory entry with LRU bookkeeping.
#[derive(Debug, Clone)]
struct MemEntry {
    payload: Value,
    expires_at: DateTime<Utc>,
    last_used: u64,
}

type FlightResult = Result<Value, CacheError>;
type FlightFuture = Shared<Pin<Box<dyn Future<Output = FlightResult> + Send>>>;

/// A keyed cache for one upstream source.
///
/// Cheap to clone; clones share the same storage and counters.
#[derive(Clone)]
pub struct SourceCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    source: String,
    dir: Option<PathBuf>,
    max_entries: usize,
    entries: Mutex<MemTable>,
    flights: Mutex<HashMap<String, (u64, FlightFuture)>>,
    next_flight_id: AtomicU64,
    stats: CacheStats,
}

#[derive(Default)]
struct MemTable {
    map: HashMap<String, MemEntry>,
    tick: u64,
}

impl SourceCache {
    /// Cache with both a memory layer and a disk layer under `dir/<source>/`.
    pub fn new(source: &str, dir: PathBuf, max_entries: usize) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                source: source.to_string(),
                dir: Some(dir.join(source)),
                max_entries,
                entries: Mutex::new(MemTable::default()),
                flights: Mutex::new(HashMap::new()),
                next_flight_id: AtomicU64::new(1),
                stats: CacheStats::default(),
            }),
        }
    }

    /// Memory-only cache, used by tests and the pre-upgrade synthetic runs.
    pub fn memory_only(source: &str, max_entries: usize) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                source: source.to_string(),
                dir: None,
                max_entries,
                entries: Mutex::new(MemTable::default()),
                flights: Mutex::new(HashMap::new()),
                next_flight_id: AtomicU64::new(1),
                stats: CacheStats::default(),
            }),
        }
    }

    /// The source tag this cache serves.
    pub fn source(&self) -> &str {
        &self.inner.source
    }

    /// Current counter values.
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Look up `key` without fetching. Batch-oriented providers use this to
    /// split a batch into cached and missing members.
    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        let key_str = key.stable_string();
        let found = self.lookup(key, &key_str);
        if found.is_some() {
            self.inner.stats.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.stats.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Insert a payload fetched outside the cache (e.g. one member of a
    /// batched upstream response).
    pub fn put(&self, key: &CacheKey, payload: Value, ttl: Duration) {
        self.insert(key, payload, ttl);
    }

    /// Look up `key`, fetching on a miss.
    ///
    /// Concurrent callers for the same missing key share one `fetch` future;
    /// the winner inserts the payload (memory, then disk) before anyone
    /// observes it. Errors are shared with every waiter and nothing is
    /// cached for them.
    pub async fn get_or_fetch<F>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        fetch: F,
    ) -> Result<Value, CacheError>
    where
        F: Future<Output = anyhow::Result<Fetched>> + Send + 'static,
    {
        let key_str = key.stable_string();

        if let Some(payload) = self.lookup(key, &key_str) {
            self.inner.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(payload);
        }

        // Join an in-flight fetch or become the one that runs it. The lock
        // is only held to consult the map, never across an await.
        let (flight_id, flight) = {
            let mut flights = self.inner.flights.lock().expect("flights lock poisoned");
            if let Some((id, existing)) = flights.get(&key_str) {
                self.inner.stats.coalesced.fetch_add(1, Ordering::Relaxed);
                (*id, existing.clone())
            } else {
                self.inner.stats.misses.fetch_add(1, Ordering::Relaxed);
                let id = self.inner.next_flight_id.fetch_add(1, Ordering::Relaxed);
                let this = self.clone();
                let owned_key = key.clone();
                let fut: Pin<Box<dyn Future<Output = FlightResult> + Send>> =
                    Box::pin(async move {
                        match fetch.await {
                            Ok(fetched) => {
                                let effective_ttl = fetched.ttl_override.unwrap_or(ttl);
                                this.insert(&owned_key, fetched.payload.clone(), effective_ttl);
                                Ok(fetched.payload)
                            }
                            Err(err) => Err(CacheError::Fetch(format!("{err:#}"))),
                        }
                    });
                let shared = fut.shared();
                flights.insert(key_str.clone(), (id, shared.clone()));
                (id, shared)
            }
        };

        let result = flight.await;

        // Whichever awaiter finishes first clears the flight, so a failed
        // fetch is never replayed to later callers. The id guard keeps a
        // newer flight registered under the same key intact.
        {
            let mut flights = self.inner.flights.lock().expect("flights lock poisoned");
            if flights.get(&key_str).is_some_and(|(id, _)| *id == flight_id) {
                flights.remove(&key_str);
            }
        }

        result
    }

    /// Memory lookup, falling back to the disk layer.
    fn lookup(&self, key: &CacheKey, key_str: &str) -> Option<Value> {
        let now = Utc::now();
        {
            let mut entries = self.inner.entries.lock().expect("entries lock poisoned");
            entries.tick += 1;
            let tick = entries.tick;
            if let Some(entry) = entries.map.get_mut(key_str) {
                if entry.expires_at > now {
                    entry.last_used = tick;
                    return Some(entry.payload.clone());
                }
                entries.map.remove(key_str);
            }
        }
        self.lookup_disk(key, now)
    }

    /// Read, verify, and re-admit a disk entry.
    fn lookup_disk(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<Value> {
        let dir = self.inner.dir.as_ref()?;
        let path = dir.join(key.file_name());
        let content = std::fs::read_to_string(&path).ok()?;

        let stored: StoredEntry = match serde_json::from_str(&content) {
            Ok(stored) => stored,
            Err(err) => {
                warn!(key = %key.stable_string(), %err, "evicting unreadable cache file");
                self.inner.stats.corrupt.fetch_add(1, Ordering::Relaxed);
                let _ = std::fs::remove_file(&path);
                return None;
            }
        };

        if payload_checksum(&stored.payload) != stored.checksum {
            warn!(key = %key.stable_string(), "evicting cache file with checksum mismatch");
            self.inner.stats.corrupt.fetch_add(1, Ordering::Relaxed);
            let _ = std::fs::remove_file(&path);
            return None;
        }

        if stored.expires_at <= now {
            let _ = std::fs::remove_file(&path);
            return None;
        }

        self.admit(key.stable_string(), stored.payload.clone(), stored.expires_at);
        Some(stored.payload)
    }

    /// Insert a fresh payload into memory and the disk layer.
    fn insert(&self, key: &CacheKey, payload: Value, ttl: Duration) {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        self.admit(key.stable_string(), payload.clone(), expires_at);

        if let Some(dir) = &self.inner.dir
            && let Err(err) = write_disk_entry(dir, key, &payload, now, expires_at)
        {
            debug!(key = %key.stable_string(), err = %format!("{err:#}"), "cache disk write failed");
        }
    }

    /// Put an entry into the memory table, evicting past the LRU bound.
    fn admit(&self, key_str: String, payload: Value, expires_at: DateTime<Utc>) {
        let mut entries = self.inner.entries.lock().expect("entries lock poisoned");
        entries.tick += 1;
        let tick = entries.tick;
        entries.map.insert(
            key_str,
            MemEntry {
                payload,
                expires_at,
                last_used: tick,
            },
        );
        while entries.map.len() > self.inner.max_entries {
            let oldest = entries
                .map
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    entries.map.remove(&k);
                    self.inner.stats.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }
    }
}

/// Atomic write-then-rename of one cache file.
fn write_disk_entry(
    dir: &Path,
    key: &CacheKey,
    payload: &Value,
    fetched_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create cache directory: {}", dir.display()))?;

    let stored = StoredEntry {
        checksum: payload_checksum(payload),
        fetched_at,
        expires_at,
        payload: payload.clone(),
    };
    let content = serde_json::to_string(&stored).context("failed to serialize cache entry")?;

    let path = dir.join(key.file_name());
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, content)
        .with_context(|| format!("failed to write cache file: {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, &path)
        .with_context(|| format!("failed to rename cache file to: {}", path.display()))?;
    Ok(())
}

/// SHA-256 over the compact JSON form of the payload.
fn payload_checksum(payload: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}
