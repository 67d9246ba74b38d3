//! Time-bounded cache of upstream lookups with paged slicing of cached results.

use crate::error::ApiError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Entries expire a fixed duration after insertion. One lock covers check-then-populate, so
/// concurrent misses on the same key trigger a single fetch.
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, (Instant, V)>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((inserted, value)) if inserted.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub async fn insert(&self, key: K, value: V) {
        self.entries.lock().await.insert(key, (Instant::now(), value));
    }

    /// Cached value for `key`, or the result of `fetch` stored under it. Failed fetches are not
    /// cached.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let mut entries = self.entries.lock().await;
        if let Some((inserted, value)) = entries.get(&key) {
            if inserted.elapsed() < self.ttl {
                return Ok(value.clone());
            }
        }
        let value = fetch().await?;
        entries.insert(key, (Instant::now(), value.clone()));
        Ok(value)
    }

    /// Drop expired entries.
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, (inserted, _)| inserted.elapsed() < ttl);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Upstream service answering a filter id with a list of records.
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    async fn fetch(&self, filter_id: &str) -> Result<Vec<Value>, ApiError>;
}

pub struct CachedLookup {
    source: Arc<dyn UpstreamSource>,
    cache: TtlCache<String, Arc<Vec<Value>>>,
}

impl CachedLookup {
    pub fn new(source: Arc<dyn UpstreamSource>, ttl: Duration) -> Self {
        Self {
            source,
            cache: TtlCache::new(ttl),
        }
    }

    /// Records `[start, end)` for `filter_id`, clipped to what exists. `None` when the upstream
    /// fetch fails; the failure is logged and not cached.
    pub async fn page(&self, filter_id: &str, start: usize, end: usize) -> Option<Vec<Value>> {
        let source = self.source.clone();
        let records = self
            .cache
            .get_or_try_insert_with(filter_id.to_string(), || async move {
                source.fetch(filter_id).await.map(Arc::new)
            })
            .await;
        match records {
            Ok(records) => {
                let end = end.min(records.len());
                let start = start.min(end);
                Some(records[start..end].to_vec())
            }
            Err(e) => {
                tracing::warn!(filter_id, error = %e, "upstream lookup failed");
                None
            }
        }
    }

    pub fn cache(&self) -> &TtlCache<String, Arc<Vec<Value>>> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counting {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl UpstreamSource for Counting {
        async fn fetch(&self, filter_id: &str) -> Result<Vec<Value>, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ApiError::Internal("upstream down".into()));
            }
            Ok((0..5).map(|i| json!({ "filter": filter_id, "n": i })).collect())
        }
    }

    fn source(fail: bool) -> Arc<Counting> {
        Arc::new(Counting {
            calls: AtomicU32::new(0),
            fail,
        })
    }

    #[tokio::test]
    async fn pages_are_sliced_and_clipped() {
        let upstream = source(false);
        let lookup = CachedLookup::new(upstream.clone(), Duration::from_secs(300));
        let page = lookup.page("f1", 1, 3).await.unwrap();
        assert_eq!(page, vec![json!({"filter": "f1", "n": 1}), json!({"filter": "f1", "n": 2})]);
        assert_eq!(lookup.page("f1", 3, 99).await.unwrap().len(), 2);
        assert!(lookup.page("f1", 10, 20).await.unwrap().is_empty());
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_yield_none_and_are_not_cached() {
        let upstream = source(true);
        let lookup = CachedLookup::new(upstream.clone(), Duration::from_secs(300));
        assert!(lookup.page("f1", 0, 2).await.is_none());
        assert!(lookup.page("f1", 0, 2).await.is_none());
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 2);
        assert!(lookup.cache().is_empty().await);
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache: TtlCache<&str, u32> = TtlCache::new(Duration::from_millis(20));
        cache.insert("k", 1).await;
        assert_eq!(cache.get(&"k").await, Some(1));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get(&"k").await, None);

        cache.insert("a", 1).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.insert("b", 2).await;
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn concurrent_misses_fetch_once() {
        let upstream = source(false);
        let lookup = Arc::new(CachedLookup::new(upstream.clone(), Duration::from_secs(300)));
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let lookup = lookup.clone();
                tokio::spawn(async move { lookup.page("shared", 0, 5).await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().len(), 5);
        }
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
    }
}
