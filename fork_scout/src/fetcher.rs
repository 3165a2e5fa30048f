use std::collections::HashMap;
use std::future::{self, Future};
use std::sync::Arc;

use futures::{stream, StreamExt};
use log::{info, warn};

use crate::api::{RepoKey, RepositoryApi, Result};
use crate::discovery::ForkError;
use crate::gateway::Gateway;
use crate::model::{Commit, RepositoryRecord};
use crate::qualification::{QualificationStats, QualifiedForksResult};

/// Called after every fork with `(current, total, status)`.
pub type ProgressCallback<'a> = &'a (dyn Fn(usize, usize, &str) + Send + Sync);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitFetchReport {
    /// Commits ahead of the parent, keyed by fork `owner/name`.
    pub commits: HashMap<String, Vec<Commit>>,
    pub errors: Vec<ForkError>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationSummary {
    pub total_forks: usize,
    pub forks_skipped: usize,
    pub forks_analyzed: usize,
    pub api_calls_saved: u64,
    pub efficiency_percentage: f64,
}

impl From<&QualificationStats> for OptimizationSummary {
    fn from(stats: &QualificationStats) -> Self {
        OptimizationSummary {
            total_forks: stats.total_forks,
            forks_skipped: stats.forks_to_skip,
            forks_analyzed: stats.forks_needing_analysis,
            api_calls_saved: stats.api_calls_saved,
            efficiency_percentage: stats.efficiency_percentage(),
        }
    }
}

impl std::fmt::Display for OptimizationSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "forks: {}\tskipped: {}\tanalyzed: {}\tcalls saved: {}\tefficiency: {:.1}%",
            self.total_forks, self.forks_skipped, self.forks_analyzed, self.api_calls_saved, self.efficiency_percentage
        ))
    }
}

/// Fetches commits only for forks qualified as needing analysis.
pub struct OptimizedCommitFetcher<API: RepositoryApi> {
    gateway: Arc<Gateway<API>>,
    max_concurrency: usize,
}

impl<API: RepositoryApi> OptimizedCommitFetcher<API> {
    pub fn new(gateway: Arc<Gateway<API>>, max_concurrency: usize) -> Self {
        OptimizedCommitFetcher {
            gateway,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub async fn fetch_commits_for_qualified_forks(
        &self,
        qualified: &mut QualifiedForksResult,
        parent: &RepoKey,
        max_commits_per_fork: usize,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<CommitFetchReport> {
        self.fetch_commits_until(qualified, parent, max_commits_per_fork, progress, future::pending())
            .await
    }

    /// Fetches up to `max_commits_per_fork` of the most recent commits each fork has ahead of `parent` and
    /// attaches them to the forks in `qualified`.
    ///
    /// Fails only when `parent` cannot be looked up. Per fork failures land in the report's `errors`.
    /// Cancelling during the parent lookup yields an empty report marked as cancelled.
    pub async fn fetch_commits_until<C>(
        &self,
        qualified: &mut QualifiedForksResult,
        parent_key: &RepoKey,
        max_commits_per_fork: usize,
        progress: Option<ProgressCallback<'_>>,
        cancel: C,
    ) -> Result<CommitFetchReport>
    where
        C: Future<Output = ()>,
    {
        tokio::pin!(cancel);
        let parent = tokio::select! {
            biased;
            _ = cancel.as_mut() => {
                warn!("Commit fetching cancelled while looking up {}", parent_key);
                return Ok(CommitFetchReport {
                    cancelled: true,
                    ..CommitFetchReport::default()
                });
            }
            parent = self.gateway.repository(parent_key) => parent?,
        };
        let parent = &parent;
        let forks: Vec<RepositoryRecord> = qualified
            .forks_needing_analysis()
            .map(|fork| fork.repository().clone())
            .collect();
        let total = forks.len();
        info!(
            "Fetching commits for {} of {} forks of {}",
            total,
            qualified.stats.total_forks,
            parent.full_name()
        );

        let gateway = &self.gateway;
        let mut fetches = stream::iter(forks)
            .map(move |fork| async move {
                let commits = gateway
                    .compare_fork(parent, &fork)
                    .await
                    .map(|comparison| most_recent(comparison.commits, max_commits_per_fork));
                (fork, commits)
            })
            .buffered(self.max_concurrency);

        let mut report = CommitFetchReport::default();
        let mut current = 0;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.as_mut() => {
                    warn!("Commit fetching cancelled after {} of {} forks", current, total);
                    report.cancelled = true;
                    break;
                }
                next = fetches.next() => next,
            };
            let (fork, commits) = match next {
                Some(fetched) => fetched,
                None => break,
            };
            current += 1;
            let status = match commits {
                Ok(commits) => {
                    let status = format!("{}: {} commits", fork.full_name(), commits.len());
                    report.commits.insert(fork.full_name(), commits);
                    status
                }
                Err(err) => {
                    warn!("Failed to fetch commits of {}: {}", fork.full_name(), err);
                    let status = format!("{}: failed, {}", fork.full_name(), err);
                    report.errors.push(ForkError::new(fork.key(), &err));
                    status
                }
            };
            if let Some(progress) = progress {
                progress(current, total, &status);
            }
        }

        for fork in qualified.forks_needing_analysis_mut() {
            if let Some(commits) = report.commits.get(&fork.repository().full_name()) {
                fork.commits = Some(commits.clone());
            }
        }
        Ok(report)
    }

    pub fn optimization_summary(stats: &QualificationStats) -> OptimizationSummary {
        OptimizationSummary::from(stats)
    }
}

fn most_recent(mut commits: Vec<Commit>, max: usize) -> Vec<Commit> {
    if commits.len() > max {
        commits.drain(..commits.len() - max);
    }
    commits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Error;
    use crate::cache::MetadataCache;
    use crate::discovery::ForkErrorKind;
    use crate::qualification::QualificationEngine;
    use crate::resilience::{CircuitBreaker, ResilientTransport, RetryConfig};
    use crate::testing::{fork, repository, ScriptedApi};
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;
    use std::time::Duration;

    fn fetcher(api: ScriptedApi) -> (OptimizedCommitFetcher<ScriptedApi>, Arc<ScriptedApi>) {
        let api = Arc::new(api);
        let transport = ResilientTransport::new(Arc::new(CircuitBreaker::default()), RetryConfig::default());
        let gateway = Gateway::new(api.clone(), Arc::new(transport), Arc::new(MetadataCache::default()));
        (OptimizedCommitFetcher::new(Arc::new(gateway), 2), api)
    }

    fn qualified(listing: Vec<RepositoryRecord>) -> QualifiedForksResult {
        QualificationEngine::default().qualify(&parent_key(), listing)
    }

    fn parent_key() -> RepoKey {
        RepoKey::new("upstream", "repo")
    }

    #[tokio::test]
    async fn fetches_only_forks_needing_analysis() {
        let listing: Vec<_> = (0..10).map(|i| fork(i, i % 2 == 0)).collect();
        let api = ScriptedApi::new(repository("upstream", "repo"), listing.clone()).with_ahead("owner_4", 3);
        let (fetcher, api) = fetcher(api);
        let mut qualified = qualified(listing);

        let report = fetcher
            .fetch_commits_for_qualified_forks(&mut qualified, &parent_key(), 10, None)
            .await
            .unwrap();

        assert_eq!(api.compare_calls.load(Ordering::SeqCst), 5);
        assert_eq!(api.repository_calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.commits.len(), 5);
        assert_eq!(report.commits["owner_4/repo"].len(), 3);
        assert!(qualified.forks_needing_analysis().all(|fork| fork.commits.is_some()));
        assert!(qualified.forks_to_skip().all(|fork| fork.commits.is_none()));
    }

    #[tokio::test]
    async fn keeps_most_recent_commits() {
        let listing = vec![fork(0, true)];
        let api = ScriptedApi::new(repository("upstream", "repo"), listing.clone()).with_ahead("owner_0", 8);
        let (fetcher, _) = fetcher(api);
        let mut qualified = qualified(listing);

        let report = fetcher
            .fetch_commits_for_qualified_forks(&mut qualified, &parent_key(), 3, None)
            .await
            .unwrap();

        let summaries: Vec<_> = report.commits["owner_0/repo"].iter().map(|c| c.summary()).collect();
        assert_eq!(summaries, vec!["Change 5 by owner_0", "Change 6 by owner_0", "Change 7 by owner_0"]);
    }

    #[tokio::test]
    async fn reports_progress_and_isolates_failures() {
        let listing: Vec<_> = (0..4).map(|i| fork(i, true)).collect();
        let api = ScriptedApi::new(repository("upstream", "repo"), listing.clone())
            .with_compare_failure("owner_2", || Error::Authentication("forbidden".to_string()));
        let (fetcher, _) = fetcher(api);
        let mut qualified = qualified(listing);
        let calls = Mutex::new(Vec::new());
        let progress = |current: usize, total: usize, status: &str| {
            calls.lock().unwrap().push((current, total, status.to_string()));
        };

        let report = fetcher
            .fetch_commits_for_qualified_forks(&mut qualified, &parent_key(), 5, Some(&progress))
            .await
            .unwrap();

        let calls = calls.into_inner().unwrap();
        assert_eq!(
            calls.iter().map(|(current, total, _)| (*current, *total)).collect::<Vec<_>>(),
            vec![(1, 4), (2, 4), (3, 4), (4, 4)]
        );
        assert!(calls[2].2.starts_with("owner_2/repo: failed"));
        assert_eq!(report.commits.len(), 3);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind, ForkErrorKind::Authentication);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_keeps_fetched_commits() {
        let listing: Vec<_> = (0..6).map(|i| fork(i, true)).collect();
        let api = ScriptedApi::new(repository("upstream", "repo"), listing.clone())
            .with_call_delay(Duration::from_secs(1));
        let (fetcher, _) = fetcher(api);
        let mut qualified = qualified(listing);

        let report = fetcher
            .fetch_commits_until(
                &mut qualified,
                &parent_key(),
                5,
                None,
                tokio::time::sleep(Duration::from_millis(2_500)),
            )
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.commits.len(), 2);
        assert_eq!(qualified.forks_needing_analysis().filter(|f| f.commits.is_some()).count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_parent_lookup() {
        let listing: Vec<_> = (0..3).map(|i| fork(i, true)).collect();
        let api = ScriptedApi::new(repository("upstream", "repo"), listing.clone())
            .with_call_delay(Duration::from_secs(100));
        let (fetcher, api) = fetcher(api);
        let mut qualified = qualified(listing);
        let started = tokio::time::Instant::now();

        let report = fetcher
            .fetch_commits_until(
                &mut qualified,
                &parent_key(),
                5,
                None,
                tokio::time::sleep(Duration::from_secs(1)),
            )
            .await
            .unwrap();

        assert!(report.cancelled);
        assert!(report.commits.is_empty());
        assert!(report.errors.is_empty());
        assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
        assert_eq!(api.compare_calls.load(Ordering::SeqCst), 0);
        assert!(qualified.forks_needing_analysis().all(|fork| fork.commits.is_none()));
    }

    #[test]
    fn summary_from_stats() {
        let listing: Vec<_> = (0..100).map(|i| fork(i, i >= 70)).collect();
        let stats = qualified(listing).stats;

        let summary = OptimizedCommitFetcher::<ScriptedApi>::optimization_summary(&stats);

        assert_eq!(summary.total_forks, 100);
        assert_eq!(summary.forks_skipped, 70);
        assert_eq!(summary.forks_analyzed, 30);
        assert_eq!(summary.api_calls_saved, 70);
        assert!((summary.efficiency_percentage - 70.0).abs() < 1e-9);
        assert!(summary.to_string().contains("efficiency: 70.0%"));
    }
}
