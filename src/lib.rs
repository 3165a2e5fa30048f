mod args;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use args::Args;
use fork_scout::api::Result;
use fork_scout::cache::{CacheStats, MetadataCache};
use fork_scout::discovery::{DiscoveryConfig, DiscoveryReport, ForkDiscovery};
use fork_scout::fetcher::{CommitFetchReport, OptimizationSummary, OptimizedCommitFetcher};
use fork_scout::gateway::Gateway;
use fork_scout::qualification::{QualificationConfig, QualificationEngine};
use fork_scout::resilience::{
    BackoffPolicy, BreakerConfig, CircuitBreaker, ResilientTransport, RetryConfig, TransportStats,
};
use futures::future::{self, Either};
use futures::FutureExt;
use github_client::{GithubClient, GithubClientBuilder};
use log::info;

/// Everything one run found out.
#[derive(Debug)]
pub struct ScoutReport {
    pub discovery: DiscoveryReport,
    pub commits: Option<CommitFetchReport>,
    pub summary: OptimizationSummary,
    pub cache: CacheStats,
    pub transport: TransportStats,
}

impl std::fmt::Display for ScoutReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for fork in &self.discovery.forks {
            writeln!(f, "{}", fork)?;
            let commits = self
                .commits
                .as_ref()
                .and_then(|commits| commits.commits.get(&fork.repository().full_name()));
            for commit in commits.into_iter().flatten() {
                writeln!(f, "\t{} {}", commit.short_sha(), commit.summary())?;
            }
        }
        let commit_errors = self.commits.iter().flat_map(|commits| commits.errors.iter());
        for error in self.discovery.errors.iter().chain(commit_errors) {
            writeln!(f, "{}", error)?;
        }
        if self.discovery.cancelled || self.commits.as_ref().map_or(false, |commits| commits.cancelled) {
            writeln!(f, "cancelled, results are partial")?;
        }
        let errors = self.discovery.errors.len() + self.commits.as_ref().map_or(0, |commits| commits.errors.len());
        writeln!(f, "{}\terrors: {}", self.summary, errors)?;
        writeln!(
            f,
            "calls made: {}\tretries: {}\treduction: {:.1}%",
            self.transport.calls_made,
            self.transport.retries,
            self.discovery.stats.reduction_percentage()
        )?;
        write!(
            f,
            "cache entries: {}\tvalid: {}\texpired: {}\tttl: {}s",
            self.cache.total_entries, self.cache.valid_entries, self.cache.expired_entries, self.cache.ttl_seconds
        )
    }
}

pub async fn scout(args: Args) -> Result<ScoutReport> {
    scout_until(args, future::pending()).await
}

/// Runs discovery and, when asked, commit fetching until done or until `cancel` completes.
pub async fn scout_until<C>(args: Args, cancel: C) -> Result<ScoutReport>
where
    C: Future<Output = ()>,
{
    let _ = env_logger::try_init();

    let call_timeout = Duration::from_secs(args.call_timeout_secs);
    let mut client = GithubClientBuilder::default()
        .with_github_url(&args.api_url)
        .with_timeout(call_timeout);
    if let Some(token) = args.api_token.clone() {
        client = client.try_with_token(token)?;
    }
    let client = client.build()?;

    let breaker = CircuitBreaker::new(BreakerConfig {
        failure_threshold: args.failure_threshold,
        open_timeout: Duration::from_secs(args.breaker_timeout_secs),
    });
    let retry = RetryConfig {
        max_retries: args.max_retries,
        call_timeout,
        backoff: BackoffPolicy {
            base_delay: Duration::from_millis(args.base_delay_ms),
            backoff_factor: args.backoff_factor,
            max_delay: Duration::from_secs(args.max_delay_secs),
            max_rate_limit_wait: Duration::from_secs(args.max_rate_limit_wait_secs),
            ..BackoffPolicy::default()
        },
    };
    let transport = Arc::new(ResilientTransport::new(Arc::new(breaker), retry));
    let cache = Arc::new(MetadataCache::new(Duration::from_secs(args.cache_ttl_secs)));
    let gateway = Arc::new(Gateway::new(Arc::new(client), transport, cache));

    let deadline = match args.deadline_secs {
        Some(secs) => Either::Left(tokio::time::sleep(Duration::from_secs(secs))),
        None => Either::Right(future::pending::<()>()),
    };
    let cancel = future::select(Box::pin(cancel), Box::pin(deadline)).map(|_| ()).shared();

    let engine = QualificationEngine::new(QualificationConfig {
        calls_per_fork_without_optimization: args.calls_per_fork,
    });
    let discovery = ForkDiscovery::new(gateway.clone(), engine, discovery_config(&args));
    let mut report = discovery.discover_forks_until(&args.repository, cancel.clone()).await?;
    report.sort(args.sort);

    let commits = if args.fetch_commits && !report.cancelled {
        let fetcher = OptimizedCommitFetcher::new(gateway.clone(), args.concurrency);
        let progress = |current: usize, total: usize, status: &str| info!("[{}/{}] {}", current, total, status);
        let parent = report.parent.key();
        let commits = fetcher
            .fetch_commits_until(
                &mut report.qualification,
                &parent,
                args.max_commits_per_fork,
                Some(&progress),
                cancel,
            )
            .await?;
        Some(commits)
    } else {
        None
    };

    Ok(ScoutReport {
        summary: OptimizedCommitFetcher::<GithubClient>::optimization_summary(&report.qualification.stats),
        discovery: report,
        commits,
        cache: gateway.cache().stats().await,
        transport: gateway.transport().stats(),
    })
}

fn discovery_config(args: &Args) -> DiscoveryConfig {
    DiscoveryConfig {
        min_activity_days: args.min_activity_days,
        min_commits_ahead: args.min_commits_ahead,
        max_forks_to_analyze: args.max_forks_to_analyze,
        max_forks_to_list: args.max_forks_to_list,
        page_size: args.page_size,
        max_concurrency: args.concurrency,
        include_archived: args.include_archived,
    }
}
