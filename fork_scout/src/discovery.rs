//! Fork discovery
//!
//! Pipeline: parent lookup (cached), paginated fork listing, qualification, activity filters and finally one
//! ahead/behind comparison per remaining fork, bounded by `max_forks_to_analyze` and `max_concurrency`.
//! A failing fork is recorded and excluded, never aborting the run. Cancellation stops the run and returns what
//! was collected so far.

use std::cmp::Reverse;
use std::future::{self, Future};
use std::ops::AddAssign;
use std::pin::Pin;
use std::sync::Arc;

use derive_more::Constructor;
use futures::{stream, StreamExt};
use log::{info, warn};
use strum_macros::{Display, EnumString};

use crate::api::{Error, RepoKey, RepositoryApi, Result};
use crate::gateway::Gateway;
use crate::model::{ComparisonStatus, RepositoryRecord};
use crate::qualification::{ForkQualificationMetrics, QualificationEngine, QualifiedForksResult};

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Forks whose last push is older than this many days are not compared. `0` disables the filter.
    pub min_activity_days: u32,
    pub min_commits_ahead: u32,
    pub max_forks_to_analyze: usize,
    /// Stop listing after this many forks.
    pub max_forks_to_list: Option<usize>,
    pub page_size: u32,
    pub max_concurrency: usize,
    pub include_archived: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig {
            min_activity_days: 365,
            min_commits_ahead: 1,
            max_forks_to_analyze: 100,
            max_forks_to_list: None,
            page_size: 100,
            max_concurrency: 4,
            include_archived: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ForkErrorKind {
    #[strum(serialize = "rate limited")]
    RateLimited,
    #[strum(serialize = "network")]
    Network,
    #[strum(serialize = "authentication")]
    Authentication,
    #[strum(serialize = "not found")]
    NotFound,
    #[strum(serialize = "malformed request")]
    MalformedRequest,
    #[strum(serialize = "malformed response")]
    MalformedResponse,
    #[strum(serialize = "circuit open")]
    CircuitOpen,
    #[strum(serialize = "other")]
    Other,
}

impl From<&Error> for ForkErrorKind {
    fn from(err: &Error) -> Self {
        match err.root_cause() {
            Error::RateLimitExceeded { .. } => ForkErrorKind::RateLimited,
            Error::TransientNetwork(_) => ForkErrorKind::Network,
            Error::Authentication(_) => ForkErrorKind::Authentication,
            Error::NotFound(_) => ForkErrorKind::NotFound,
            Error::MalformedRequest(_) => ForkErrorKind::MalformedRequest,
            Error::MalformedResponse(_) => ForkErrorKind::MalformedResponse,
            Error::CircuitOpen(_) => ForkErrorKind::CircuitOpen,
            _ => ForkErrorKind::Other,
        }
    }
}

/// A fork that could not be analyzed, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct ForkError {
    pub fork: RepoKey,
    pub kind: ForkErrorKind,
    pub message: String,
}

impl ForkError {
    pub fn new(fork: RepoKey, err: &Error) -> Self {
        ForkError {
            fork,
            kind: ForkErrorKind::from(err),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for ForkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fork: {}\terror: {}\t{}", self.fork, self.kind, self.message)
    }
}

/// A fork with commits ahead of its parent.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzableFork {
    pub metrics: ForkQualificationMetrics,
    pub status: ComparisonStatus,
    pub ahead_by: u32,
    pub behind_by: u32,
}

impl AnalyzableFork {
    pub fn repository(&self) -> &RepositoryRecord {
        &self.metrics.repository
    }
}

impl std::fmt::Display for AnalyzableFork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let repository = self.repository();
        f.write_fmt(format_args!(
            "fork: {}\tahead: {}\tbehind: {}\tstatus: {}\tstars: {}\tlast push: {}",
            repository.full_name(),
            self.ahead_by,
            self.behind_by,
            self.status,
            repository.stars,
            repository
                .pushed_at
                .map(|pushed_at| pushed_at.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "unknown".to_string())
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ForkSort {
    CommitsAhead,
    Stars,
    Pushed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DiscoveryStats {
    pub api_calls_made: u64,
    pub api_calls_saved: u64,
}

impl DiscoveryStats {
    /// Share of the calls the run would have made without qualification that it did not make.
    pub fn reduction_percentage(&self) -> f64 {
        let total = self.api_calls_made + self.api_calls_saved;
        if total == 0 {
            0.0
        } else {
            self.api_calls_saved as f64 / total as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryReport {
    pub parent: RepositoryRecord,
    pub qualification: QualifiedForksResult,
    pub forks: Vec<AnalyzableFork>,
    pub errors: Vec<ForkError>,
    pub filtered_inactive: usize,
    pub filtered_archived: usize,
    pub below_min_commits: usize,
    pub over_limit: usize,
    /// `false` when the listing stopped early because of an error or cancellation.
    pub listing_complete: bool,
    pub cancelled: bool,
    pub stats: DiscoveryStats,
}

impl DiscoveryReport {
    fn new(parent: RepositoryRecord, qualification: QualifiedForksResult) -> Self {
        DiscoveryReport {
            parent,
            qualification,
            forks: Vec::new(),
            errors: Vec::new(),
            filtered_inactive: 0,
            filtered_archived: 0,
            below_min_commits: 0,
            over_limit: 0,
            listing_complete: true,
            cancelled: false,
            stats: DiscoveryStats::default(),
        }
    }

    pub fn sort(&mut self, sort: ForkSort) {
        match sort {
            ForkSort::CommitsAhead => self.forks.sort_by_key(|fork| Reverse(fork.ahead_by)),
            ForkSort::Stars => self.forks.sort_by_key(|fork| Reverse(fork.repository().stars)),
            ForkSort::Pushed => self.forks.sort_by_key(|fork| Reverse(fork.repository().pushed_at)),
        }
    }
}

#[derive(Constructor)]
struct Page {
    page_no: u32,
    take: usize,
}

#[derive(Constructor)]
struct Paginator {
    page_no: u32,
    page_size: usize,
    remaining: Option<usize>,
}

impl Paginator {
    fn next_page(&mut self) -> Option<Page> {
        let take = match self.remaining {
            Some(0) => return None,
            Some(remaining) => remaining.min(self.page_size),
            None => self.page_size,
        };
        let page = Page::new(self.page_no, take);
        self.page_no.add_assign(1);
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= take;
        }
        Some(page)
    }
}

#[derive(Default)]
struct ForkListing {
    forks: Vec<RepositoryRecord>,
    pages: u64,
    complete: bool,
    cancelled: bool,
}

pub struct ForkDiscovery<API: RepositoryApi> {
    gateway: Arc<Gateway<API>>,
    engine: QualificationEngine,
    config: DiscoveryConfig,
}

impl<API: RepositoryApi> ForkDiscovery<API> {
    pub fn new(gateway: Arc<Gateway<API>>, engine: QualificationEngine, config: DiscoveryConfig) -> Self {
        ForkDiscovery {
            gateway,
            engine,
            config,
        }
    }

    pub async fn discover_forks(&self, repository: &str) -> Result<DiscoveryReport> {
        self.discover_forks_until(repository, future::pending()).await
    }

    /// Runs discovery until done or until `cancel` completes.
    ///
    /// Fails only when the parent repository or the first listing page cannot be fetched. Cancellation before
    /// the parent is known is reported as `Error::Cancelled`.
    pub async fn discover_forks_until<C>(&self, repository: &str, cancel: C) -> Result<DiscoveryReport>
    where
        C: Future<Output = ()>,
    {
        let parent_key = RepoKey::parse(repository)?;
        let calls_before = self.gateway.transport().calls_made();
        tokio::pin!(cancel);

        let parent = tokio::select! {
            biased;
            _ = cancel.as_mut() => return Err(Error::Cancelled),
            parent = self.gateway.repository(&parent_key) => parent?,
        };
        info!(
            "Discovering forks of {} ({} forks reported)",
            parent.full_name(),
            parent.forks_count
        );

        let listing = self.list_forks(&parent_key, cancel.as_mut()).await?;
        let mut qualification = self.engine.qualify(&parent_key, listing.forks);
        qualification.stats.api_calls_made = listing.pages;

        let mut report = DiscoveryReport::new(parent, qualification);
        report.listing_complete = listing.complete;
        report.cancelled = listing.cancelled;

        if !report.cancelled {
            let candidates = self.select_candidates(&mut report);
            self.compare_forks(&mut report, candidates, cancel.as_mut()).await;
        }

        report.stats = DiscoveryStats {
            api_calls_made: self.gateway.transport().calls_made() - calls_before,
            api_calls_saved: report.qualification.stats.api_calls_saved,
        };
        info!(
            "Discovery of {} finished: {} forks with commits ahead, {} errors, {} calls made, {} saved ({:.1}%)",
            report.parent.full_name(),
            report.forks.len(),
            report.errors.len(),
            report.stats.api_calls_made,
            report.stats.api_calls_saved,
            report.stats.reduction_percentage()
        );
        Ok(report)
    }

    async fn list_forks<C>(&self, parent: &RepoKey, mut cancel: Pin<&mut C>) -> Result<ForkListing>
    where
        C: Future<Output = ()>,
    {
        let page_size = self.config.page_size.clamp(1, API::MAX_PAGE_SIZE);
        let mut paginator = Paginator::new(API::FIRST_PAGE_NUMBER, page_size as usize, self.config.max_forks_to_list);
        let mut listing = ForkListing {
            complete: true,
            ..ForkListing::default()
        };

        while let Some(page) = paginator.next_page() {
            let forks = tokio::select! {
                biased;
                _ = cancel.as_mut() => {
                    warn!("Fork listing of {} cancelled after {} pages", parent, listing.pages);
                    listing.complete = false;
                    listing.cancelled = true;
                    break;
                }
                forks = self.gateway.forks_page(parent, page.page_no, page_size) => forks,
            };
            match forks {
                Ok(forks) => {
                    listing.pages += 1;
                    let last_page = forks.len() < page_size as usize;
                    listing.forks.extend(forks.into_iter().take(page.take));
                    if last_page {
                        break;
                    }
                }
                Err(err) if listing.pages == 0 => return Err(err),
                Err(err) => {
                    warn!(
                        "Fork listing of {} stopped at page {}, continuing with {} forks: {}",
                        parent,
                        page.page_no,
                        listing.forks.len(),
                        err
                    );
                    listing.complete = false;
                    break;
                }
            }
        }
        Ok(listing)
    }

    /// Forks needing analysis that pass the archive and activity filters, capped at `max_forks_to_analyze`.
    fn select_candidates(&self, report: &mut DiscoveryReport) -> Vec<ForkQualificationMetrics> {
        let mut candidates = Vec::new();
        for fork in report.qualification.forks_needing_analysis() {
            let metrics = &fork.metrics;
            let repository = &metrics.repository;
            if repository.disabled || (repository.archived && !self.config.include_archived) {
                report.filtered_archived += 1;
            } else if !self.is_active(metrics) {
                report.filtered_inactive += 1;
            } else if candidates.len() >= self.config.max_forks_to_analyze {
                report.over_limit += 1;
            } else {
                candidates.push(metrics.clone());
            }
        }
        if report.over_limit > 0 {
            info!(
                "Comparing {} forks, {} more over the limit of {}",
                candidates.len(),
                report.over_limit,
                self.config.max_forks_to_analyze
            );
        }
        candidates
    }

    fn is_active(&self, metrics: &ForkQualificationMetrics) -> bool {
        if self.config.min_activity_days == 0 {
            return true;
        }
        metrics
            .days_since_last_push()
            .map_or(true, |days| days <= self.config.min_activity_days as i64)
    }

    async fn compare_forks<C>(
        &self,
        report: &mut DiscoveryReport,
        candidates: Vec<ForkQualificationMetrics>,
        mut cancel: Pin<&mut C>,
    ) where
        C: Future<Output = ()>,
    {
        let parent = &report.parent.clone();
        let gateway = &self.gateway;
        let mut comparisons = stream::iter(candidates)
            .map(move |metrics| async move {
                let comparison = gateway.compare_fork(parent, &metrics.repository).await;
                (metrics, comparison)
            })
            .buffered(self.config.max_concurrency.max(1));

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.as_mut() => {
                    warn!("Discovery of {} cancelled, returning partial results", parent.full_name());
                    report.cancelled = true;
                    break;
                }
                next = comparisons.next() => next,
            };
            match next {
                Some((metrics, Ok(comparison))) => {
                    if comparison.ahead_by >= self.config.min_commits_ahead && comparison.ahead_by > 0 {
                        report.forks.push(AnalyzableFork {
                            metrics,
                            status: comparison.status,
                            ahead_by: comparison.ahead_by,
                            behind_by: comparison.behind_by,
                        });
                    } else {
                        report.below_min_commits += 1;
                    }
                }
                Some((metrics, Err(err))) => {
                    warn!("Failed to compare {}: {}", metrics.repository.full_name(), err);
                    report.errors.push(ForkError::new(metrics.repository.key(), &err));
                }
                None => break,
            }
        }
    }
}
