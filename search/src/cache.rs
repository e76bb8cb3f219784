//! Two-tier response cache.
//!
//! - **L1**: in-process map of key to `(bytes, expiry)` behind a
//!   reader/writer lock, swept periodically
//! - **L2**: Redis with its own TTL, shared by every replica
//!
//! Reads try L1, then L2 (refilling L1 on an L2 hit). Writes fill both.
//! L2 failures are logged and treated as misses; the cache never fails a
//! request.
//!
//! Invalidation is substring-based: `invalidate("activity")` drops every key
//! containing `activity` from L1 and, best effort, from L2.

use async_trait::async_trait;
use gym_runtime::PeriodicTask;
use gym_runtime::metrics::SEARCH_CACHE;
use md5::{Digest, Md5};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::SearchError;

/// Interval of the L1 sweeper.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Deterministic key: `<prefix>:<md5(json(value))>`.
///
/// ```
/// use gym_search::cache::cache_key;
///
/// let key = cache_key("search", &serde_json::json!({"query": "yoga"}));
/// assert!(key.starts_with("search:"));
/// assert_eq!(key.len(), "search:".len() + 32);
/// ```
pub fn cache_key<T: Serialize + ?Sized>(prefix: &str, value: &T) -> String {
    let encoded = serde_json::to_vec(value).unwrap_or_default();
    format!("{prefix}:{}", hex::encode(Md5::digest(&encoded)))
}

/// Which tier answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// In-process.
    Local,
    /// Redis.
    Remote,
}

#[derive(Debug, Clone)]
struct LocalEntry {
    data: Arc<[u8]>,
    expires_at: Instant,
}

/// In-process tier.
#[derive(Debug)]
pub struct LocalCache {
    entries: RwLock<HashMap<String, LocalEntry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LocalCache {
    /// Empty cache whose entries live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Live entry for `key`.
    pub async fn get(&self, key: &str) -> Option<Arc<[u8]>> {
        let found = self
            .entries
            .read()
            .await
            .get(key)
            .filter(|entry| Instant::now() < entry.expires_at)
            .map(|entry| Arc::clone(&entry.data));
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Store `data` under `key` for one TTL.
    pub async fn set(&self, key: &str, data: Arc<[u8]>) {
        let entry = LocalEntry {
            data,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.write().await.insert(key.to_string(), entry);
    }

    /// Drop one key.
    pub async fn delete(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    /// Drop every key containing `pattern`; returns how many went.
    pub async fn invalidate(&self, pattern: &str) -> usize {
        if pattern.is_empty() {
            return 0;
        }
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.contains(pattern));
        before - entries.len()
    }

    /// Drop everything.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Drop expired entries; returns how many went.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| now < entry.expires_at);
        before - entries.len()
    }

    /// Entries currently held, expired or not.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether nothing is held.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Network tier.
#[async_trait]
pub trait RemoteCache: Send + Sync {
    /// Value under `key`, if any.
    ///
    /// # Errors
    ///
    /// [`SearchError::Cache`] on transport failure.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SearchError>;

    /// Store with a TTL.
    ///
    /// # Errors
    ///
    /// [`SearchError::Cache`] on transport failure.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), SearchError>;

    /// Drop one key.
    ///
    /// # Errors
    ///
    /// [`SearchError::Cache`] on transport failure.
    async fn delete(&self, key: &str) -> Result<(), SearchError>;

    /// Drop every key containing `pattern`; returns how many went.
    ///
    /// # Errors
    ///
    /// [`SearchError::Cache`] on transport failure.
    async fn delete_matching(&self, pattern: &str) -> Result<usize, SearchError>;

    /// Drop everything.
    ///
    /// # Errors
    ///
    /// [`SearchError::Cache`] on transport failure.
    async fn flush(&self) -> Result<(), SearchError>;
}

/// Redis tier over a multiplexed, auto-reconnecting connection.
///
/// The cache owns its Redis database: [`flush`](RemoteCache::flush) runs
/// `FLUSHDB`.
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    /// Connect to `redis_url` (e.g. `redis://127.0.0.1:6379/1`).
    ///
    /// # Errors
    ///
    /// [`SearchError::Cache`] if the URL is invalid or the server unreachable.
    pub async fn connect(redis_url: &str) -> Result<Self, SearchError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| SearchError::Cache(format!("Failed to create Redis client: {e}")))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| SearchError::Cache(format!("Failed to connect to Redis: {e}")))?;
        Ok(Self { manager })
    }
}

fn redis_error(operation: &str, error: &redis::RedisError) -> SearchError {
    SearchError::Cache(format!("{operation} failed: {error}"))
}

/// `*<pattern>*` with glob metacharacters escaped.
fn glob_contains(pattern: &str) -> String {
    let mut glob = String::with_capacity(pattern.len() + 2);
    glob.push('*');
    for c in pattern.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            glob.push('\\');
        }
        glob.push(c);
    }
    glob.push('*');
    glob
}

#[async_trait]
impl RemoteCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SearchError> {
        let mut conn = self.manager.clone();
        conn.get(key).await.map_err(|e| redis_error("GET", &e))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), SearchError> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .set_ex(key, value, ttl.as_secs().max(1))
            .await
            .map_err(|e| redis_error("SETEX", &e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), SearchError> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(key).await.map_err(|e| redis_error("DEL", &e))?;
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> Result<usize, SearchError> {
        let mut conn = self.manager.clone();
        let glob = glob_contains(pattern);
        let mut cursor: u64 = 0;
        let mut deleted = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&glob)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await
                .map_err(|e| redis_error("SCAN", &e))?;
            if !keys.is_empty() {
                let removed: usize = conn.del(&keys).await.map_err(|e| redis_error("DEL", &e))?;
                deleted += removed;
            }
            if next == 0 {
                return Ok(deleted);
            }
            cursor = next;
        }
    }

    async fn flush(&self) -> Result<(), SearchError> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error("FLUSHDB", &e))?;
        Ok(())
    }
}

/// L1 statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Entries held in process.
    pub local_cache_size: usize,
    /// L1 hits since start.
    pub local_cache_hits: u64,
    /// L1 misses since start.
    pub local_cache_misses: u64,
}

/// L1 in front of an optional L2.
pub struct TwoTierCache {
    local: LocalCache,
    remote: Option<Arc<dyn RemoteCache>>,
    remote_ttl: Duration,
}

impl TwoTierCache {
    /// Combine the tiers. Without `remote` the cache is L1 only.
    #[must_use]
    pub fn new(local_ttl: Duration, remote: Option<Arc<dyn RemoteCache>>, remote_ttl: Duration) -> Self {
        Self {
            local: LocalCache::new(local_ttl),
            remote,
            remote_ttl,
        }
    }

    /// Cached bytes and the tier that had them.
    pub async fn get(&self, key: &str) -> Option<(Arc<[u8]>, Tier)> {
        if let Some(data) = self.local.get(key).await {
            record("local", "hit");
            return Some((data, Tier::Local));
        }
        record("local", "miss");

        let remote = self.remote.as_ref()?;
        match remote.get(key).await {
            Ok(Some(bytes)) => {
                record("remote", "hit");
                let data: Arc<[u8]> = bytes.into();
                self.local.set(key, Arc::clone(&data)).await;
                Some((data, Tier::Remote))
            }
            Ok(None) => {
                record("remote", "miss");
                None
            }
            Err(e) => {
                record("remote", "error");
                tracing::warn!(key, error = %e, "Remote cache read failed, treating as miss");
                None
            }
        }
    }

    /// Store in both tiers.
    pub async fn set(&self, key: &str, data: Vec<u8>) {
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.set(key, &data, self.remote_ttl).await {
                tracing::warn!(key, error = %e, "Remote cache write failed, keeping local copy only");
            }
        }
        self.local.set(key, data.into()).await;
    }

    /// Drop one key from both tiers.
    pub async fn delete(&self, key: &str) {
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.delete(key).await {
                tracing::warn!(key, error = %e, "Remote cache delete failed");
            }
        }
        self.local.delete(key).await;
    }

    /// Drop every key containing `pattern`; returns how many L1 entries went.
    pub async fn invalidate(&self, pattern: &str) -> usize {
        let removed = self.local.invalidate(pattern).await;
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.delete_matching(pattern).await {
                tracing::warn!(pattern, error = %e, "Remote cache invalidation failed");
            }
        }
        tracing::debug!(pattern, removed, "Cache invalidated");
        removed
    }

    /// Invalidate after a write to documents of `kind`: its by-id entries and
    /// every cached page, whose hashed keys say nothing about their content.
    /// `search:` also matches `quicksearch:`.
    pub async fn invalidate_kind(&self, kind: &str) {
        if !kind.is_empty() {
            self.invalidate(kind).await;
        }
        self.invalidate("search:").await;
    }

    /// Empty both tiers.
    pub async fn flush_all(&self) {
        self.local.clear().await;
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.flush().await {
                tracing::warn!(error = %e, "Remote cache flush failed");
            }
        }
        tracing::info!("Cache flushed");
    }

    /// Evict expired L1 entries.
    pub async fn sweep(&self) -> usize {
        self.local.sweep().await
    }

    /// L1 statistics.
    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            local_cache_size: self.local.len().await,
            local_cache_hits: self.local.hits.load(Ordering::Relaxed),
            local_cache_misses: self.local.misses.load(Ordering::Relaxed),
        }
    }
}

fn record(tier: &'static str, result: &'static str) {
    metrics::counter!(SEARCH_CACHE, "tier" => tier, "result" => result).increment(1);
}

/// Background task evicting expired L1 entries every `period`.
pub fn sweeper(cache: Arc<TwoTierCache>, period: Duration) -> PeriodicTask {
    PeriodicTask::new("search-cache-sweeper", period, move || {
        let cache = Arc::clone(&cache);
        async move {
            let evicted = cache.sweep().await;
            if evicted > 0 {
                tracing::debug!(evicted, "Swept expired cache entries");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::sync::Mutex;

    /// Remote tier backed by a map; can be switched to fail.
    #[derive(Default)]
    struct MapRemote {
        entries: Mutex<HashMap<String, Vec<u8>>>,
        down: std::sync::atomic::AtomicBool,
    }

    impl MapRemote {
        fn check(&self) -> Result<(), SearchError> {
            if self.down.load(Ordering::SeqCst) {
                Err(SearchError::Cache("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl RemoteCache for MapRemote {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SearchError> {
            self.check()?;
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }

        async fn set(&self, key: &str, value: &[u8], _ttl: Duration) -> Result<(), SearchError> {
            self.check()?;
            self.entries.lock().unwrap().insert(key.into(), value.to_vec());
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), SearchError> {
            self.check()?;
            self.entries.lock().unwrap().remove(key);
            Ok(())
        }

        async fn delete_matching(&self, pattern: &str) -> Result<usize, SearchError> {
            self.check()?;
            let mut entries = self.entries.lock().unwrap();
            let before = entries.len();
            entries.retain(|key, _| !key.contains(pattern));
            Ok(before - entries.len())
        }

        async fn flush(&self) -> Result<(), SearchError> {
            self.check()?;
            self.entries.lock().unwrap().clear();
            Ok(())
        }
    }

    fn two_tier(local_ttl: Duration) -> (TwoTierCache, Arc<MapRemote>) {
        let remote = Arc::new(MapRemote::default());
        let cache = TwoTierCache::new(local_ttl, Some(remote.clone()), Duration::from_secs(60));
        (cache, remote)
    }

    #[test]
    fn keys_are_deterministic() {
        let a = cache_key("search", &serde_json::json!({"query": "yoga", "page": 1}));
        let b = cache_key("search", &serde_json::json!({"query": "yoga", "page": 1}));
        let c = cache_key("search", &serde_json::json!({"query": "pilates", "page": 1}));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.strip_prefix("search:").unwrap().chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn local_hit_then_remote_refill() {
        let (cache, remote) = two_tier(Duration::from_secs(30));
        cache.set("search:abc", b"payload".to_vec()).await;

        let (data, tier) = cache.get("search:abc").await.unwrap();
        assert_eq!(&*data, b"payload");
        assert_eq!(tier, Tier::Local);

        // Another replica's write, visible only in L2
        remote.entries.lock().unwrap().insert("search:def".into(), b"other".to_vec());
        assert_eq!(cache.get("search:def").await.unwrap().1, Tier::Remote);
        assert_eq!(cache.get("search:def").await.unwrap().1, Tier::Local);
    }

    #[tokio::test]
    async fn invalidation_matches_substrings_in_both_tiers() {
        let (cache, remote) = two_tier(Duration::from_secs(30));
        cache.set("activity:7", b"a".to_vec()).await;
        cache.set("plan:p1", b"p".to_vec()).await;

        assert_eq!(cache.invalidate("activity").await, 1);
        assert!(cache.get("activity:7").await.is_none());
        assert!(cache.get("plan:p1").await.is_some());
        assert!(!remote.entries.lock().unwrap().contains_key("activity:7"));
    }

    #[tokio::test]
    async fn kind_invalidation_drops_pages_too() {
        let (cache, _remote) = two_tier(Duration::from_secs(30));
        cache.set("activity:7", b"a".to_vec()).await;
        cache.set(&cache_key("search", "yoga"), b"s".to_vec()).await;
        cache.set(&cache_key("quicksearch", "yoga"), b"q".to_vec()).await;
        cache.set("plan:p1", b"p".to_vec()).await;

        cache.invalidate_kind("activity").await;
        assert_eq!(cache.stats().await.local_cache_size, 1);
        assert!(cache.get("plan:p1").await.is_some());
    }

    #[tokio::test]
    async fn remote_outage_degrades_to_local() {
        let (cache, remote) = two_tier(Duration::from_secs(30));
        remote.down.store(true, Ordering::SeqCst);

        cache.set("search:abc", b"payload".to_vec()).await;
        assert_eq!(cache.get("search:abc").await.unwrap().1, Tier::Local);
        assert!(cache.get("search:zzz").await.is_none());
        cache.invalidate("search").await;
        assert!(cache.get("search:abc").await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_miss_and_are_swept() {
        let cache = TwoTierCache::new(Duration::ZERO, None, Duration::from_secs(60));
        cache.set("search:abc", b"payload".to_vec()).await;

        assert!(cache.get("search:abc").await.is_none());
        assert_eq!(cache.sweep().await, 1);
        assert_eq!(cache.stats().await.local_cache_size, 0);
    }

    #[tokio::test]
    async fn flush_empties_both_tiers() {
        let (cache, remote) = two_tier(Duration::from_secs(30));
        cache.set("search:abc", b"payload".to_vec()).await;
        cache.flush_all().await;
        assert!(cache.get("search:abc").await.is_none());
        assert!(remote.entries.lock().unwrap().is_empty());
    }

    #[test]
    fn glob_escapes_metacharacters() {
        assert_eq!(glob_contains("activity"), "*activity*");
        assert_eq!(glob_contains("a*b"), r"*a\*b*");
    }
}
