//! Fork qualification
//!
//! Decides, from the fork listing alone, which forks can possibly carry commits that are not in the parent.
//! A fork whose `pushed_at` is not later than its `created_at` never received a push of its own, so comparing
//! it against the parent would only confirm that it has no commits ahead. Such forks are skipped; every other
//! fork, including forks with missing timestamps, needs analysis.
//!
//! This is a heuristic over wall clock timestamps, not a guarantee: history rewritten back to the creation
//! timestamp would be classified as "no commits".

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, info};
use strum_macros::Display;

use crate::api::RepoKey;
use crate::model::{Commit, RepositoryRecord};

/// Calls a naive analysis spends on every fork.
pub const DEFAULT_CALLS_PER_FORK: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Qualification {
    Skip,
    NeedsAnalysis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum CommitsAheadStatus {
    #[strum(serialize = "No commits ahead")]
    NoCommitsAhead,
    #[strum(serialize = "Has commits")]
    HasCommits,
    #[strum(serialize = "Unknown")]
    Unknown,
}

/// `true` only when both timestamps are known and the fork was never pushed to after creation.
pub fn can_skip_analysis(record: &RepositoryRecord) -> bool {
    match (record.pushed_at, record.created_at) {
        (Some(pushed_at), Some(created_at)) => pushed_at <= created_at,
        _ => false,
    }
}

/// Per fork signals derived from listing data, evaluated at a fixed instant.
#[derive(Debug, Clone, PartialEq)]
pub struct ForkQualificationMetrics {
    pub repository: RepositoryRecord,
    pub evaluated_at: DateTime<Utc>,
    pub can_skip_analysis: bool,
}

impl ForkQualificationMetrics {
    pub fn new(repository: RepositoryRecord, evaluated_at: DateTime<Utc>) -> Self {
        let can_skip_analysis = can_skip_analysis(&repository);
        ForkQualificationMetrics {
            repository,
            evaluated_at,
            can_skip_analysis,
        }
    }

    pub fn qualification(&self) -> Qualification {
        if self.can_skip_analysis {
            Qualification::Skip
        } else {
            Qualification::NeedsAnalysis
        }
    }

    pub fn commits_ahead_status(&self) -> CommitsAheadStatus {
        match (self.repository.pushed_at, self.repository.created_at) {
            (Some(_), Some(_)) if self.can_skip_analysis => CommitsAheadStatus::NoCommitsAhead,
            (Some(_), Some(_)) => CommitsAheadStatus::HasCommits,
            _ => CommitsAheadStatus::Unknown,
        }
    }

    pub fn days_since_creation(&self) -> Option<i64> {
        self.days_since(self.repository.created_at)
    }

    pub fn days_since_last_push(&self) -> Option<i64> {
        self.days_since(self.repository.pushed_at)
    }

    pub fn days_since_last_update(&self) -> Option<i64> {
        self.days_since(self.repository.updated_at)
    }

    /// Share of the fork's lifetime that passed before its last push, in `[0, 1]`.
    pub fn activity_ratio(&self) -> Option<f64> {
        let created_at = self.repository.created_at?;
        let pushed_at = self.repository.pushed_at?;
        let lifetime = (self.evaluated_at - created_at).num_seconds();
        if lifetime <= 0 {
            return Some(0.0);
        }
        let active = (pushed_at - created_at).num_seconds();
        Some((active as f64 / lifetime as f64).clamp(0.0, 1.0))
    }

    pub fn engagement_score(&self) -> f64 {
        let repository = &self.repository;
        repository.stars as f64 + 2.0 * repository.forks_count as f64 + 0.5 * repository.open_issues as f64
    }

    fn days_since(&self, timestamp: Option<DateTime<Utc>>) -> Option<i64> {
        timestamp.map(|timestamp| (self.evaluated_at - timestamp).num_days())
    }
}

/// A qualified fork, optionally enriched with fetched commits.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedForkData {
    pub metrics: ForkQualificationMetrics,
    pub commits: Option<Vec<Commit>>,
}

impl CollectedForkData {
    pub fn new(metrics: ForkQualificationMetrics) -> Self {
        CollectedForkData { metrics, commits: None }
    }

    pub fn repository(&self) -> &RepositoryRecord {
        &self.metrics.repository
    }

    pub fn key(&self) -> RepoKey {
        self.metrics.repository.key()
    }

    pub fn qualification(&self) -> Qualification {
        self.metrics.qualification()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QualificationStats {
    pub total_forks: usize,
    pub forks_to_skip: usize,
    pub forks_needing_analysis: usize,
    pub archived_forks: usize,
    pub disabled_forks: usize,
    pub api_calls_made: u64,
    pub api_calls_saved: u64,
    pub calls_per_fork: u32,
    pub processing_time: Duration,
}

impl QualificationStats {
    pub fn skip_rate_percentage(&self) -> f64 {
        percentage(self.forks_to_skip as f64, self.total_forks as f64)
    }

    pub fn analysis_candidate_percentage(&self) -> f64 {
        percentage(self.forks_needing_analysis as f64, self.total_forks as f64)
    }

    /// Share of the calls a naive per fork analysis would have made that were avoided.
    pub fn efficiency_percentage(&self) -> f64 {
        let naive_calls = self.total_forks as f64 * self.calls_per_fork as f64;
        percentage(self.api_calls_saved as f64, naive_calls)
    }
}

fn percentage(part: f64, whole: f64) -> f64 {
    if whole <= 0.0 {
        0.0
    } else {
        part / whole * 100.0
    }
}

/// Every listed fork, in listing order, tagged with its qualification.
///
/// The two partitions are views over `forks`, so each fork belongs to exactly one of them.
#[derive(Debug, Clone, PartialEq)]
pub struct QualifiedForksResult {
    pub parent: RepoKey,
    pub forks: Vec<CollectedForkData>,
    pub stats: QualificationStats,
}

impl QualifiedForksResult {
    pub fn forks_to_skip(&self) -> impl Iterator<Item = &CollectedForkData> {
        self.partition(Qualification::Skip)
    }

    pub fn forks_needing_analysis(&self) -> impl Iterator<Item = &CollectedForkData> {
        self.partition(Qualification::NeedsAnalysis)
    }

    pub fn forks_needing_analysis_mut(&mut self) -> impl Iterator<Item = &mut CollectedForkData> {
        self.forks
            .iter_mut()
            .filter(|fork| fork.qualification() == Qualification::NeedsAnalysis)
    }

    fn partition(&self, qualification: Qualification) -> impl Iterator<Item = &CollectedForkData> {
        self.forks
            .iter()
            .filter(move |fork| fork.qualification() == qualification)
    }
}

#[derive(Debug, Clone)]
pub struct QualificationConfig {
    pub calls_per_fork_without_optimization: u32,
}

impl Default for QualificationConfig {
    fn default() -> Self {
        QualificationConfig {
            calls_per_fork_without_optimization: DEFAULT_CALLS_PER_FORK,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QualificationEngine {
    config: QualificationConfig,
}

impl QualificationEngine {
    pub fn new(config: QualificationConfig) -> Self {
        QualificationEngine { config }
    }

    pub fn qualify(&self, parent: &RepoKey, fork_listing: Vec<RepositoryRecord>) -> QualifiedForksResult {
        self.qualify_at(parent, fork_listing, Utc::now())
    }

    /// Qualifies `fork_listing` with all time based signals evaluated at `now`. Makes no network calls.
    pub fn qualify_at(
        &self,
        parent: &RepoKey,
        fork_listing: Vec<RepositoryRecord>,
        now: DateTime<Utc>,
    ) -> QualifiedForksResult {
        let started = Instant::now();
        let calls_per_fork = self.config.calls_per_fork_without_optimization;
        let mut stats = QualificationStats {
            calls_per_fork,
            ..QualificationStats::default()
        };

        let forks: Vec<CollectedForkData> = fork_listing
            .into_iter()
            .map(|record| {
                let fork = CollectedForkData::new(ForkQualificationMetrics::new(record, now));
                stats.total_forks += 1;
                stats.archived_forks += fork.repository().archived as usize;
                stats.disabled_forks += fork.repository().disabled as usize;
                match fork.qualification() {
                    Qualification::Skip => stats.forks_to_skip += 1,
                    Qualification::NeedsAnalysis => stats.forks_needing_analysis += 1,
                }
                debug!("Fork {} qualified as {}", fork.repository().full_name(), fork.qualification());
                fork
            })
            .collect();

        stats.api_calls_saved = stats.forks_to_skip as u64 * calls_per_fork as u64;
        stats.processing_time = started.elapsed();
        info!(
            "Qualified {} forks of {}: {} to skip, {} need analysis, {} calls saved",
            stats.total_forks, parent, stats.forks_to_skip, stats.forks_needing_analysis, stats.api_calls_saved
        );

        QualifiedForksResult {
            parent: parent.clone(),
            forks,
            stats,
        }
    }
}
