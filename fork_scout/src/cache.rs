use std::collections::HashMap;
use std::time::Duration;

use log::debug;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::api::RepoKey;
use crate::model::RepositoryRecord;

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
struct CacheEntry {
    record: RepositoryRecord,
    inserted_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub ttl_seconds: u64,
}

/// Process local, time boxed store of repository records.
///
/// Expired entries are never returned. They are purged when read, not swept.
#[derive(Debug)]
pub struct MetadataCache {
    ttl: Duration,
    entries: Mutex<HashMap<RepoKey, CacheEntry>>,
}

impl Default for MetadataCache {
    fn default() -> Self {
        MetadataCache::new(DEFAULT_TTL)
    }
}

impl MetadataCache {
    pub fn new(ttl: Duration) -> Self {
        MetadataCache {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, repo: &RepoKey) -> Option<RepositoryRecord> {
        let mut entries = self.entries.lock().await;
        match entries.get(repo) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                debug!("Cache hit for {}", repo);
                Some(entry.record.clone())
            }
            Some(_) => {
                debug!("Cache entry for {} expired", repo);
                entries.remove(repo);
                None
            }
            None => {
                debug!("Cache miss for {}", repo);
                None
            }
        }
    }

    pub async fn put(&self, repo: RepoKey, record: RepositoryRecord) {
        let entry = CacheEntry {
            record,
            inserted_at: Instant::now(),
        };
        self.entries.lock().await.insert(repo, entry);
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().await;
        let valid_entries = entries
            .values()
            .filter(|entry| entry.inserted_at.elapsed() < self.ttl)
            .count();
        CacheStats {
            total_entries: entries.len(),
            valid_entries,
            expired_entries: entries.len() - valid_entries,
            ttl_seconds: self.ttl.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, stars: u32) -> RepositoryRecord {
        RepositoryRecord {
            owner: "owner".to_string(),
            name: name.to_string(),
            stars,
            ..RepositoryRecord::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn returns_value_within_ttl() {
        let cache = MetadataCache::new(Duration::from_secs(60));
        let key = RepoKey::new("owner", "repo");
        cache.put(key.clone(), record("repo", 1)).await;

        tokio::time::advance(Duration::from_secs(59)).await;

        assert_eq!(cache.get(&key).await, Some(record("repo", 1)));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_absent_and_purged() {
        let cache = MetadataCache::new(Duration::from_secs(60));
        let key = RepoKey::new("owner", "repo");
        cache.put(key.clone(), record("repo", 1)).await;

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(
            cache.stats().await,
            CacheStats {
                total_entries: 1,
                valid_entries: 0,
                expired_entries: 1,
                ttl_seconds: 60,
            }
        );

        assert_eq!(cache.get(&key).await, None);
        assert_eq!(cache.stats().await.total_entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn put_overwrites_and_refreshes() {
        let cache = MetadataCache::new(Duration::from_secs(60));
        let key = RepoKey::new("owner", "repo");
        cache.put(key.clone(), record("repo", 1)).await;
        tokio::time::advance(Duration::from_secs(40)).await;
        cache.put(key.clone(), record("repo", 2)).await;
        tokio::time::advance(Duration::from_secs(40)).await;

        assert_eq!(cache.get(&key).await, Some(record("repo", 2)));
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let cache = MetadataCache::default();
        cache.put(RepoKey::new("owner", "a"), record("a", 1)).await;
        cache.put(RepoKey::new("owner", "b"), record("b", 1)).await;
        assert_eq!(cache.stats().await.valid_entries, 2);

        cache.clear().await;

        assert_eq!(cache.stats().await.total_entries, 0);
        assert_eq!(cache.get(&RepoKey::new("owner", "a")).await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_access() {
        let cache = std::sync::Arc::new(MetadataCache::default());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    let key = RepoKey::new("owner", format!("repo_{}", i % 4));
                    cache.put(key.clone(), record("repo", i)).await;
                    cache.get(&key).await.is_some()
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(cache.stats().await.total_entries, 4);
    }
}
