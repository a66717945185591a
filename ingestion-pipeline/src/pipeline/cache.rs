use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use common::{
    error::AppError, types::extraction_result::ExtractionResult, utils::config::AppConfig,
};
use tokio::{sync::Mutex, time::Instant};
use tracing::debug;

/// Content-hash keyed store of finished extractions.
///
/// Purely an optimization: callers treat any error as a miss and recompute.
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Arc<ExtractionResult>>, AppError>;

    async fn put(&self, key: &str, value: Arc<ExtractionResult>) -> Result<(), AppError>;
}

struct CacheEntry {
    result: Arc<ExtractionResult>,
    inserted_at: Instant,
}

/// In-process cache with a per-entry time to live and oldest-insert-first eviction.
pub struct InMemoryResultCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    capacity: usize,
    timeout: Duration,
}

impl InMemoryResultCache {
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::with_capacity(capacity.min(1_024))),
            capacity,
            timeout,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.cache_capacity, config.cache_timeout())
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl ResultCache for InMemoryResultCache {
    async fn get(&self, key: &str) -> Result<Option<Arc<ExtractionResult>>, AppError> {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get(key) else {
            return Ok(None);
        };

        if entry.inserted_at.elapsed() < self.timeout {
            return Ok(Some(Arc::clone(&entry.result)));
        }

        entries.remove(key);
        debug!(content_hash = key, "cache entry expired");
        Ok(None)
    }

    async fn put(&self, key: &str, value: Arc<ExtractionResult>) -> Result<(), AppError> {
        if self.capacity == 0 {
            return Ok(());
        }

        let mut entries = self.entries.lock().await;
        if !entries.contains_key(key) && entries.len() >= self.capacity {
            // Linear scan; capacity is bounded.
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(oldest_key, _)| oldest_key.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
                debug!(evicted = %oldest, "cache at capacity; evicted oldest entry");
            }
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                result: value,
                inserted_at: Instant::now(),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use common::types::source_format::SourceFormat;
    use tokio::time::advance;

    use super::*;

    fn result(key: &str) -> Arc<ExtractionResult> {
        Arc::new(ExtractionResult::new(
            key.to_string(),
            format!("text for {key}"),
            SourceFormat::Text,
            0,
            0,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_plus_one_evicts_first_inserted() {
        let cache = InMemoryResultCache::new(3, Duration::from_secs(3_600));
        for key in ["a", "b", "c", "d"] {
            cache.put(key, result(key)).await.expect("put");
            advance(Duration::from_millis(5)).await;
        }

        assert_eq!(cache.len().await, 3);
        assert!(cache.get("a").await.expect("get").is_none());
        for key in ["b", "c", "d"] {
            assert!(cache.get(key).await.expect("get").is_some(), "{key} kept");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn entry_past_timeout_is_a_miss_and_removed() {
        let timeout = Duration::from_secs(60);
        let cache = InMemoryResultCache::new(10, timeout);
        cache.put("k", result("k")).await.expect("put");

        advance(timeout - Duration::from_millis(1)).await;
        assert!(cache.get("k").await.expect("get").is_some());

        advance(Duration::from_millis(2)).await;
        assert!(cache.get("k").await.expect("get").is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn overwriting_existing_key_does_not_evict() {
        let cache = InMemoryResultCache::new(2, Duration::from_secs(3_600));
        cache.put("a", result("a")).await.expect("put");
        advance(Duration::from_millis(1)).await;
        cache.put("b", result("b")).await.expect("put");
        advance(Duration::from_millis(1)).await;
        cache.put("a", result("a")).await.expect("put");

        assert_eq!(cache.len().await, 2);
        assert!(cache.get("b").await.expect("get").is_some());

        // "b" is now the oldest insert.
        advance(Duration::from_millis(1)).await;
        cache.put("c", result("c")).await.expect("put");
        assert!(cache.get("b").await.expect("get").is_none());
        assert!(cache.get("a").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn zero_capacity_never_stores() {
        let cache = InMemoryResultCache::new(0, Duration::from_secs(3_600));
        cache.put("a", result("a")).await.expect("put");
        assert!(cache.is_empty().await);
        assert!(cache.get("a").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn hits_share_the_stored_result() {
        let cache = InMemoryResultCache::new(4, Duration::from_secs(3_600));
        let stored = result("shared");
        cache.put("shared", Arc::clone(&stored)).await.expect("put");

        let hit = cache.get("shared").await.expect("get").expect("hit");
        assert!(Arc::ptr_eq(&hit, &stored));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_inserts_respect_capacity() {
        let cache = Arc::new(InMemoryResultCache::new(16, Duration::from_secs(3_600)));
        let handles: Vec<_> = (0..64)
            .map(|i| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    let key = format!("key-{i}");
                    cache.put(&key, result(&key)).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.expect("join").expect("put");
        }
        assert_eq!(cache.len().await, 16);
    }
}
