use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    last_accessed: Instant,
    hit_count: u64,
}

/// A bounded TTL + LRU map: entries expire after `ttl` and the
/// least-recently-accessed entry is evicted once `capacity` is exceeded.
/// Every layer of the cache manager (embedding, query-result,
/// patient-index) is an instance of this with different key/value types.
pub struct TtlLruCache<K, V> {
    entries: Mutex<HashMap<K, Entry<V>>>,
    capacity: usize,
    ttl: Duration,
}

impl<K, V> TtlLruCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity,
            ttl,
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.entries.lock().await;
        let expired = match guard.get(key) {
            Some(entry) => entry.inserted_at.elapsed() >= self.ttl,
            None => return None,
        };
        if expired {
            guard.remove(key);
            return None;
        }
        let entry = guard.get_mut(key)?;
        entry.last_accessed = Instant::now();
        entry.hit_count += 1;
        Some(entry.value.clone())
    }

    pub async fn put(&self, key: K, value: V) {
        let mut guard = self.entries.lock().await;
        if guard.len() >= self.capacity && !guard.contains_key(&key) {
            if let Some(lru_key) = guard
                .iter()
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(k, _)| k.clone())
            {
                guard.remove(&lru_key);
            }
        }
        let now = Instant::now();
        guard.insert(
            key,
            Entry {
                value,
                inserted_at: now,
                last_accessed: now,
                hit_count: 0,
            },
        );
    }

    /// Removes every entry whose TTL has elapsed; run by the 60-second
    /// sweeper. Returns the number of entries removed.
    pub async fn sweep_expired(&self) -> usize {
        let mut guard = self.entries.lock().await;
        let before = guard.len();
        guard.retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
        before - guard.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

/// `SHA-256(normalized text)` — the embedding cache key.
pub fn embedding_cache_key(normalized_text: &str) -> String {
    hash(normalized_text)
}

/// `SHA-256(normalized_query + patient_id + JSON(filters))` — the
/// query-result cache key.
pub fn query_cache_key(normalized_query: &str, patient_id: &str, filters_json: &str) -> String {
    hash(&format!("{normalized_query}\u{0}{patient_id}\u{0}{filters_json}"))
}

fn hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// The set of chunk IDs and their metadata for one patient, as cached by
/// the patient-index layer.
#[derive(Debug, Clone)]
pub struct PatientIndexEntry {
    pub chunk_ids: Vec<String>,
    pub metadata: serde_json::Value,
}

/// Owns the three independent cache layers (§4.13) and the sweeper that
/// evicts expired entries across all of them.
pub struct CacheManager {
    pub embeddings: TtlLruCache<String, Vec<f32>>,
    pub query_results: TtlLruCache<String, serde_json::Value>,
    pub patient_index: TtlLruCache<String, PatientIndexEntry>,
}

impl CacheManager {
    pub fn new(
        embed_capacity: usize,
        embed_ttl: Duration,
        query_capacity: usize,
        query_ttl: Duration,
        patient_capacity: usize,
        patient_ttl: Duration,
    ) -> Self {
        Self {
            embeddings: TtlLruCache::new(embed_capacity, embed_ttl),
            query_results: TtlLruCache::new(query_capacity, query_ttl),
            patient_index: TtlLruCache::new(patient_capacity, patient_ttl),
        }
    }

    /// Evicts expired entries across all three layers; intended to run on a
    /// 60-second ticker.
    pub async fn sweep(&self) -> (usize, usize, usize) {
        (
            self.embeddings.sweep_expired().await,
            self.query_results.sweep_expired().await,
            self.patient_index.sweep_expired().await,
        )
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new(
            1_000,
            Duration::from_millis(300_000),
            100,
            Duration::from_millis(300_000),
            5,
            Duration::from_millis(1_800_000),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identical_keys_hit_the_same_entry() {
        let key_a = query_cache_key("what medications", "p1", "{}");
        let key_b = query_cache_key("what medications", "p1", "{}");
        assert_eq!(key_a, key_b);
    }

    #[tokio::test]
    async fn lru_evicts_least_recently_accessed_beyond_capacity() {
        let cache: TtlLruCache<String, i32> = TtlLruCache::new(2, Duration::from_secs(60));
        cache.put("a".into(), 1).await;
        cache.put("b".into(), 2).await;
        // touch "a" so "b" becomes the least-recently-used entry
        let _ = cache.get(&"a".to_string()).await;
        cache.put("c".into(), 3).await;

        assert!(cache.get(&"a".to_string()).await.is_some());
        assert!(cache.get(&"b".to_string()).await.is_none());
        assert!(cache.get(&"c".to_string()).await.is_some());
    }

    #[tokio::test]
    async fn ttl_expires_entries() {
        let cache: TtlLruCache<String, i32> = TtlLruCache::new(10, Duration::from_millis(10));
        cache.put("a".into(), 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get(&"a".to_string()).await.is_none());
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_entries() {
        let cache: TtlLruCache<String, i32> = TtlLruCache::new(10, Duration::from_millis(10));
        cache.put("a".into(), 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.put("b".into(), 2).await;

        let removed = cache.sweep_expired().await;
        assert_eq!(removed, 1);
        assert_eq!(cache.len().await, 1);
    }
}
