use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::AppConfig;
use crate::services::object_store::{ObjectStore, StoreResult};

/// Monotonic time source. Injected so cache expiry is testable without
/// sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Hand-advanced clock for tests.
#[derive(Default)]
pub struct ManualClock {
    millis: std::sync::atomic::AtomicU64,
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(
            by.as_millis() as u64,
            std::sync::atomic::Ordering::SeqCst,
        );
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.millis.load(std::sync::atomic::Ordering::SeqCst))
    }
}

struct CachedUrl {
    url: String,
    expires_at: Duration,
}

/// Memoizes signed download URLs per (key, ttl) so repeated requests do not
/// hammer the remote authorization endpoint. A URL close to expiry is never
/// reused; the reuse margin is a fixed window when configured, otherwise
/// a quarter of the TTL capped at one minute.
pub struct SignedUrlCache {
    store: Arc<dyn ObjectStore>,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<(String, u64), CachedUrl>>,
    default_ttl: Duration,
    min_ttl: Duration,
    max_ttl: Duration,
    refresh_window: Option<Duration>,
}

impl SignedUrlCache {
    /// Pool for client-facing URLs: caller-chosen TTLs, clamped.
    pub fn for_clients(
        store: Arc<dyn ObjectStore>,
        clock: Arc<dyn Clock>,
        config: &AppConfig,
    ) -> Self {
        Self {
            store,
            clock,
            entries: Mutex::new(HashMap::new()),
            default_ttl: Duration::from_secs(config.client_url_default_ttl_secs),
            min_ttl: Duration::from_secs(config.client_url_min_ttl_secs),
            max_ttl: Duration::from_secs(config.client_url_max_ttl_secs),
            refresh_window: None,
        }
    }

    /// Pool for the streaming proxy: one long-lived TTL, re-issued inside a
    /// fixed refresh window before expiry.
    pub fn for_proxy(
        store: Arc<dyn ObjectStore>,
        clock: Arc<dyn Clock>,
        config: &AppConfig,
    ) -> Self {
        let ttl = Duration::from_secs(config.proxy_url_ttl_secs);
        Self {
            store,
            clock,
            entries: Mutex::new(HashMap::new()),
            default_ttl: ttl,
            min_ttl: ttl,
            max_ttl: ttl,
            refresh_window: Some(Duration::from_secs(config.proxy_url_refresh_secs)),
        }
    }

    pub fn clamp_ttl(&self, requested: Option<Duration>) -> Duration {
        requested
            .unwrap_or(self.default_ttl)
            .clamp(self.min_ttl, self.max_ttl)
    }

    fn reuse_margin(&self, ttl: Duration) -> Duration {
        self.refresh_window
            .unwrap_or_else(|| (ttl / 4).min(Duration::from_secs(60)))
    }

    /// Returns a signed URL and the TTL it was issued with. Cached entries
    /// are reused until they enter the reuse margin before expiry.
    pub async fn get(
        &self,
        key: &str,
        requested_ttl: Option<Duration>,
    ) -> StoreResult<(String, Duration)> {
        let ttl = self.clamp_ttl(requested_ttl);
        let cache_key = (key.to_string(), ttl.as_secs());
        let now = self.clock.now();
        let margin = self.reuse_margin(ttl);

        if let Some(entry) = self.entries.lock().unwrap().get(&cache_key) {
            if entry.expires_at > now + margin {
                return Ok((entry.url.clone(), ttl));
            }
        }

        let url = self.store.signed_download_url(key, ttl).await?;
        self.entries.lock().unwrap().insert(
            cache_key,
            CachedUrl {
                url: url.clone(),
                expires_at: now + ttl,
            },
        );
        Ok((url, ttl))
    }

    /// Drops every cached URL for `key`, across all TTLs. Used when the
    /// remote store rejects a URL early.
    pub fn invalidate(&self, key: &str) {
        self.entries
            .lock()
            .unwrap()
            .retain(|(cached_key, _), _| cached_key != key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory_store::MemoryObjectStore;

    fn cache_with_store() -> (Arc<MemoryObjectStore>, Arc<ManualClock>, SignedUrlCache) {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert("dir/clip.mp4", b"x", "video/mp4");
        let clock = Arc::new(ManualClock::default());
        let cache = SignedUrlCache::for_clients(
            store.clone(),
            clock.clone(),
            &AppConfig::production(),
        );
        (store, clock, cache)
    }

    #[tokio::test]
    async fn test_reuses_url_until_near_expiry() {
        let (store, clock, cache) = cache_with_store();

        let (first, ttl) = cache.get("dir/clip.mp4", None).await.unwrap();
        assert_eq!(ttl, Duration::from_secs(300));
        let (second, _) = cache.get("dir/clip.mp4", None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.urls_issued(), 1);

        // Inside the reuse margin (ttl/4 capped at 60s) a fresh URL is
        // issued.
        clock.advance(Duration::from_secs(250));
        let (third, _) = cache.get("dir/clip.mp4", None).await.unwrap();
        assert_ne!(first, third);
        assert_eq!(store.urls_issued(), 2);
    }

    #[tokio::test]
    async fn test_ttl_is_clamped() {
        let (_, _, cache) = cache_with_store();

        let (_, low) = cache
            .get("dir/clip.mp4", Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(low, Duration::from_secs(300));

        let (_, high) = cache
            .get("dir/clip.mp4", Some(Duration::from_secs(48 * 3600)))
            .await
            .unwrap();
        assert_eq!(high, Duration::from_secs(6 * 3600));
    }

    #[tokio::test]
    async fn test_distinct_ttls_get_distinct_entries() {
        let (store, _, cache) = cache_with_store();

        cache
            .get("dir/clip.mp4", Some(Duration::from_secs(600)))
            .await
            .unwrap();
        cache
            .get("dir/clip.mp4", Some(Duration::from_secs(1200)))
            .await
            .unwrap();
        assert_eq!(store.urls_issued(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_reissue() {
        let (store, _, cache) = cache_with_store();

        let (first, _) = cache.get("dir/clip.mp4", None).await.unwrap();
        cache.invalidate("dir/clip.mp4");
        let (second, _) = cache.get("dir/clip.mp4", None).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(store.urls_issued(), 2);
    }

    #[tokio::test]
    async fn test_proxy_pool_refresh_window() {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert("dir/clip.mp4", b"x", "video/mp4");
        let clock = Arc::new(ManualClock::default());
        let cache = SignedUrlCache::for_proxy(
            store.clone(),
            clock.clone(),
            &AppConfig::production(),
        );

        cache.get("dir/clip.mp4", None).await.unwrap();
        // 22 hours in: still outside the 1 hour refresh window of a 24 hour
        // TTL.
        clock.advance(Duration::from_secs(22 * 3600));
        cache.get("dir/clip.mp4", None).await.unwrap();
        assert_eq!(store.urls_issued(), 1);

        clock.advance(Duration::from_secs(90 * 60));
        cache.get("dir/clip.mp4", None).await.unwrap();
        assert_eq!(store.urls_issued(), 2);
    }
}
