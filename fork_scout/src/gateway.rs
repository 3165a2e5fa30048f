use std::sync::Arc;

use log::debug;
use tokio::sync::Mutex;

use crate::api::{RepoKey, RepositoryApi, Result};
use crate::cache::MetadataCache;
use crate::model::{Comparison, RepositoryRecord};
use crate::resilience::ResilientTransport;

/// The only path to the remote API: every call goes through the resilient transport, repository lookups
/// through the metadata cache first.
pub struct Gateway<API: RepositoryApi> {
    api: Arc<API>,
    transport: Arc<ResilientTransport>,
    cache: Arc<MetadataCache>,
    // Serializes cache misses so concurrent lookups of one parent issue a single call.
    lookup: Mutex<()>,
}

impl<API: RepositoryApi> Gateway<API> {
    pub fn new(api: Arc<API>, transport: Arc<ResilientTransport>, cache: Arc<MetadataCache>) -> Self {
        Gateway {
            api,
            transport,
            cache,
            lookup: Mutex::new(()),
        }
    }

    pub fn transport(&self) -> &ResilientTransport {
        &self.transport
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    pub async fn repository(&self, repo: &RepoKey) -> Result<RepositoryRecord> {
        if let Some(record) = self.cache.get(repo).await {
            return Ok(record);
        }
        let _guard = self.lookup.lock().await;
        if let Some(record) = self.cache.get(repo).await {
            return Ok(record);
        }
        let api = &self.api;
        let record = self
            .transport
            .execute("get_repository", move || api.repository(repo))
            .await?;
        self.cache.put(repo.clone(), record.clone()).await;
        Ok(record)
    }

    pub async fn forks_page(&self, repo: &RepoKey, page: u32, per_page: u32) -> Result<Vec<RepositoryRecord>> {
        let api = &self.api;
        let forks = self
            .transport
            .execute("list_forks", move || api.forks(repo, page, per_page))
            .await?;
        debug!("Fetched {} forks of {} from page {}", forks.len(), repo, page);
        Ok(forks)
    }

    pub async fn compare(&self, repo: &RepoKey, base: &str, head: &str) -> Result<Comparison> {
        let api = &self.api;
        self.transport
            .execute("compare", move || api.compare(repo, base, head))
            .await
    }

    /// Compares the default branch of `fork` against the default branch of `parent`.
    pub async fn compare_fork(&self, parent: &RepositoryRecord, fork: &RepositoryRecord) -> Result<Comparison> {
        let branch = if fork.default_branch.is_empty() {
            &parent.default_branch
        } else {
            &fork.default_branch
        };
        let head = format!("{}:{}", fork.owner, branch);
        self.compare(&parent.key(), &parent.default_branch, &head).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{CircuitBreaker, RetryConfig};
    use crate::testing::{fork, repository, ScriptedApi};
    use std::time::Duration;

    fn gateway(api: ScriptedApi, ttl: Duration) -> Gateway<ScriptedApi> {
        let transport = ResilientTransport::new(Arc::new(CircuitBreaker::default()), RetryConfig::default());
        Gateway::new(Arc::new(api), Arc::new(transport), Arc::new(MetadataCache::new(ttl)))
    }

    #[tokio::test(start_paused = true)]
    async fn parent_is_fetched_once_for_many_forks() {
        let parent = repository("upstream", "repo");
        let api = ScriptedApi::new(parent.clone(), vec![fork(0, true), fork(1, true)]);
        let gateway = gateway(api, Duration::from_secs(60));

        let for_fork_a = gateway.repository(&parent.key()).await.unwrap();
        let for_fork_b = gateway.repository(&parent.key()).await.unwrap();

        assert_eq!(for_fork_a, for_fork_b);
        assert_eq!(gateway.transport().calls_made(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn parent_is_refetched_after_ttl() {
        let parent = repository("upstream", "repo");
        let gateway = gateway(ScriptedApi::new(parent.clone(), Vec::new()), Duration::from_secs(60));

        gateway.repository(&parent.key()).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        gateway.repository(&parent.key()).await.unwrap();

        assert_eq!(gateway.transport().calls_made(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_lookups_share_one_call() {
        let parent = repository("upstream", "repo");
        let gateway = Arc::new(gateway(
            ScriptedApi::new(parent.clone(), Vec::new()).with_call_delay(Duration::from_millis(20)),
            Duration::from_secs(60),
        ));

        let lookups: Vec<_> = (0..8)
            .map(|_| {
                let gateway = gateway.clone();
                let key = parent.key();
                tokio::spawn(async move { gateway.repository(&key).await.map(|record| record.id) })
            })
            .collect();
        for lookup in lookups {
            assert_eq!(lookup.await.unwrap().unwrap(), parent.id);
        }

        assert_eq!(gateway.transport().calls_made(), 1);
    }

    #[tokio::test]
    async fn compares_fork_default_branch() {
        let parent = repository("upstream", "repo");
        let api = ScriptedApi::new(parent.clone(), vec![fork(0, true)]).with_ahead("owner_0", 3);
        let gateway = gateway(api, Duration::from_secs(60));

        let comparison = gateway.compare_fork(&parent, &fork(0, true)).await.unwrap();

        assert_eq!(comparison.ahead_by, 3);
        assert_eq!(comparison.commits.len(), 3);
    }
}
