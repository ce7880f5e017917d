//! Content-addressed result cache.
//!
//! Two tiers behind one store contract: an in-process map for
//! same-instance hits in front of the authoritative SQLite layer.
//! Keys derive deterministically from (content, linter, format,
//! options); options are normalized first, so key order and array
//! order in the client's JSON never split the cache.
//!
//! Read failures from the persistent tier are swallowed and counted as
//! misses - a broken cache degrades to slower responses, never to
//! failed ones. Write failures surface.

use crate::db::Database;
use crate::error::{CacheError, CacheResult};
use crate::types::{CacheEntry, CacheStatus, LintOptions};
use ahash::AHashMap;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Lowercase hex encoding of raw bytes.
fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        write!(out, "{byte:02x}").unwrap();
    }
    out
}

/// The read/write contract both tiers satisfy.
pub trait CacheStore: Send + Sync {
    /// Freshest non-expired entry for the composite key, or `None`.
    fn fetch(
        &self,
        content_hash: &str,
        linter: &str,
        options_hash: &str,
        now: DateTime<Utc>,
    ) -> CacheResult<Option<CacheEntry>>;

    fn store(&self, entry: &CacheEntry) -> CacheResult<()>;

    fn invalidate(&self, content_hash: Option<&str>, linter: Option<&str>) -> CacheResult<usize>;

    fn cleanup(&self, now: DateTime<Utc>) -> CacheResult<usize>;
}

fn tier_key(content_hash: &str, linter: &str, options_hash: &str) -> String {
    format!("{content_hash}:{linter}:{options_hash}")
}

/// In-process tier.
struct MemoryStore {
    map: Mutex<AHashMap<String, CacheEntry>>,
}

impl MemoryStore {
    fn new() -> Self {
        Self {
            map: Mutex::new(AHashMap::new()),
        }
    }
}

impl CacheStore for MemoryStore {
    fn fetch(
        &self,
        content_hash: &str,
        linter: &str,
        options_hash: &str,
        now: DateTime<Utc>,
    ) -> CacheResult<Option<CacheEntry>> {
        let key = tier_key(content_hash, linter, options_hash);
        let mut map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        match map.get(&key) {
            Some(entry) if !entry.is_expired(now) => Ok(Some(entry.clone())),
            Some(_) => {
                // Never serve past expires_at; drop the stale copy
                map.remove(&key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn store(&self, entry: &CacheEntry) -> CacheResult<()> {
        let key = tier_key(&entry.content_hash, &entry.linter_type, &entry.options_hash);
        let mut map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(key, entry.clone());
        Ok(())
    }

    fn invalidate(&self, content_hash: Option<&str>, linter: Option<&str>) -> CacheResult<usize> {
        let mut map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        let before = map.len();
        map.retain(|_, e| {
            let content_match = content_hash.is_none_or(|h| e.content_hash == h);
            let linter_match = linter.is_none_or(|l| e.linter_type == l);
            !(content_match && linter_match)
        });
        Ok(before - map.len())
    }

    fn cleanup(&self, now: DateTime<Utc>) -> CacheResult<usize> {
        let mut map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        let before = map.len();
        map.retain(|_, e| !e.is_expired(now));
        Ok(before - map.len())
    }
}

/// Authoritative tier over the persistent collaborator.
struct DbStore {
    db: Arc<Database>,
}

impl CacheStore for DbStore {
    fn fetch(
        &self,
        content_hash: &str,
        linter: &str,
        options_hash: &str,
        now: DateTime<Utc>,
    ) -> CacheResult<Option<CacheEntry>> {
        self.db
            .freshest_result(content_hash, linter, options_hash, now)
            .map_err(|e| CacheError::Persistence(e.to_string()))
    }

    fn store(&self, entry: &CacheEntry) -> CacheResult<()> {
        self.db
            .insert_result(entry)
            .map(|_| ())
            .map_err(|e| CacheError::Persistence(e.to_string()))
    }

    fn invalidate(&self, content_hash: Option<&str>, linter: Option<&str>) -> CacheResult<usize> {
        self.db
            .invalidate_results(content_hash, linter)
            .map_err(|e| CacheError::Persistence(e.to_string()))
    }

    fn cleanup(&self, now: DateTime<Utc>) -> CacheResult<usize> {
        self.db
            .delete_expired_results(now)
            .map_err(|e| CacheError::Persistence(e.to_string()))
    }
}

/// Aggregate cache statistics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub total_entries: u64,
    pub hit_rate_percentage: f64,
    pub size_mb: f64,
    pub expired_entries: u64,
}

/// Raw hit/miss counters.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct HitMissStats {
    pub hits: u64,
    pub misses: u64,
    pub rate: f64,
}

/// One key to precompute (and optionally pre-seed) at startup.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct WarmCacheConfig {
    pub linter: String,
    pub format: String,
    pub content: String,
    #[serde(default)]
    pub options: LintOptions,
}

/// Two-tier cache service.
pub struct CacheService {
    front: MemoryStore,
    back: DbStore,
    db: Arc<Database>,
    hits: AtomicU64,
    misses: AtomicU64,
    default_ttl_hours: i64,
}

impl CacheService {
    #[must_use]
    pub fn new(db: Arc<Database>, default_ttl_hours: i64) -> Self {
        Self {
            front: MemoryStore::new(),
            back: DbStore {
                db: Arc::clone(&db),
            },
            db,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            default_ttl_hours,
        }
    }

    /// SHA-256 of the raw submitted bytes, lowercase hex (64 chars).
    #[must_use]
    pub fn generate_content_hash(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex_encode(hasher.finalize().as_slice())
    }

    /// SHA-256 over the canonical serialization of the options.
    #[must_use]
    pub fn generate_options_hash(options: &LintOptions) -> String {
        let canonical = options.canonical().to_string();
        Self::generate_content_hash(canonical.as_bytes())
    }

    /// The composite cache key.
    #[must_use]
    pub fn generate_cache_key(
        content_hash: &str,
        linter: &str,
        format: &str,
        options_hash: &str,
    ) -> String {
        format!("{linter}:{format}:{content_hash}:{options_hash}")
    }

    /// Front-then-back lookup. Hit/miss counters are bumped exactly
    /// once per call; persistent-tier errors count as a miss.
    pub fn get(
        &self,
        content_hash: &str,
        linter: &str,
        options_hash: &str,
    ) -> Option<CacheEntry> {
        let now = Utc::now();

        if let Ok(Some(entry)) = self.front.fetch(content_hash, linter, options_hash, now) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry);
        }

        match self.back.fetch(content_hash, linter, options_hash, now) {
            Ok(Some(entry)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                // Promote for the next same-instance lookup
                let _ = self.front.store(&entry);
                Some(entry)
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "cache read failed, treating as miss");
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Writes an entry to both tiers. Persistent failures surface.
    #[allow(clippy::too_many_arguments)]
    pub fn set(
        &self,
        content_hash: &str,
        linter: &str,
        format: &str,
        options_hash: &str,
        result: String,
        status: CacheStatus,
        error_message: Option<String>,
        ttl_hours: Option<i64>,
    ) -> CacheResult<CacheEntry> {
        let now = Utc::now();
        let ttl = ttl_hours.unwrap_or(self.default_ttl_hours);
        let entry = CacheEntry {
            id: 0,
            content_hash: content_hash.to_string(),
            linter_type: linter.to_string(),
            options_hash: options_hash.to_string(),
            result,
            format: format.to_string(),
            status,
            error_message,
            created_at: now,
            expires_at: now + Duration::hours(ttl),
        };

        self.back.store(&entry)?;
        let _ = self.front.store(&entry);
        Ok(entry)
    }

    /// Removes matching entries from both tiers; `None` broadens scope.
    pub fn invalidate(
        &self,
        content_hash: Option<&str>,
        linter: Option<&str>,
    ) -> CacheResult<usize> {
        let _ = self.front.invalidate(content_hash, linter);
        self.back.invalidate(content_hash, linter)
    }

    /// Deletes expired entries from both tiers.
    pub fn cleanup(&self) -> CacheResult<usize> {
        let now = Utc::now();
        let _ = self.front.cleanup(now);
        self.back.cleanup(now)
    }

    /// Precomputes keys for the given configurations. Individual
    /// failures are logged, never raised.
    pub fn warm_cache(&self, configs: &[WarmCacheConfig]) -> Vec<String> {
        let mut keys = Vec::with_capacity(configs.len());
        for config in configs {
            let content_hash = Self::generate_content_hash(config.content.as_bytes());
            let options_hash = Self::generate_options_hash(&config.options);
            let key = Self::generate_cache_key(
                &content_hash,
                &config.linter,
                &config.format,
                &options_hash,
            );
            tracing::debug!(%key, "warmed cache key");
            keys.push(key);
        }
        keys
    }

    /// Aggregate statistics from the persistent tier plus counters.
    pub fn get_stats(&self) -> CacheResult<CacheStats> {
        let now = Utc::now();
        let total_entries = self
            .db
            .result_count()
            .map_err(|e| CacheError::Persistence(e.to_string()))?;
        let expired_entries = self
            .db
            .expired_result_count(now)
            .map_err(|e| CacheError::Persistence(e.to_string()))?;
        let size_mb = self
            .db
            .size_mb()
            .map_err(|e| CacheError::Persistence(e.to_string()))?;

        Ok(CacheStats {
            total_entries,
            hit_rate_percentage: self.get_hit_miss_stats().rate * 100.0,
            size_mb,
            expired_entries,
        })
    }

    /// Raw counters since construction or the last reset.
    pub fn get_hit_miss_stats(&self) -> HitMissStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        HitMissStats { hits, misses, rate }
    }

    /// Zeros the hit/miss counters.
    pub fn reset_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

// ============================================================================
// Background cleanup
// ============================================================================

/// Handle to the periodic cleanup task. The timer only exists when the
/// service was configured with an interval; dropping the handle without
/// calling [`CleanupTask::stop`] aborts the loop on runtime shutdown.
pub struct CleanupTask {
    shutdown: Arc<Notify>,
    handle: tokio::task::JoinHandle<()>,
}

impl CleanupTask {
    /// Starts the periodic cleanup loop.
    #[must_use]
    pub fn spawn(cache: Arc<CacheService>, interval: std::time::Duration) -> Self {
        let shutdown = Arc::new(Notify::new());
        let stop = Arc::clone(&shutdown);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let cache = Arc::clone(&cache);
                        let swept = tokio::task::spawn_blocking(move || cache.cleanup()).await;
                        match swept {
                            Ok(Ok(count)) if count > 0 => {
                                tracing::info!(count, "swept expired cache entries");
                            }
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => tracing::warn!(error = %e, "cache cleanup failed"),
                            Err(e) => tracing::warn!(error = %e, "cache cleanup task panicked"),
                        }
                    }
                    () = stop.notified() => break,
                }
            }
        });
        Self { shutdown, handle }
    }

    /// Stops the loop and waits for it to finish.
    pub async fn stop(self) {
        self.shutdown.notify_one();
        let _ = self.handle.await;
    }
}

// ============================================================================
// Tests
// ============================================================================
