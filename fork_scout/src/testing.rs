//! Scripted in-memory `RepositoryApi` for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};

use crate::api::{Error, RepoKey, RepositoryApi, Result};
use crate::model::{Commit, Comparison, ComparisonStatus, RepositoryRecord};

pub fn repository(owner: &str, name: &str) -> RepositoryRecord {
    let created_at = Utc::now() - ChronoDuration::days(400);
    RepositoryRecord {
        id: 1,
        owner: owner.to_string(),
        name: name.to_string(),
        default_branch: "main".to_string(),
        created_at: Some(created_at),
        updated_at: Some(created_at + ChronoDuration::days(399)),
        pushed_at: Some(created_at + ChronoDuration::days(399)),
        stars: 1000,
        forks_count: 100,
        ..RepositoryRecord::default()
    }
}

/// Fork `owner_<index>/repo`, pushed to an hour after creation when `has_commits`.
pub fn fork(index: usize, has_commits: bool) -> RepositoryRecord {
    let created_at = Utc::now() - ChronoDuration::days(30);
    let pushed_at = if has_commits {
        created_at + ChronoDuration::hours(1)
    } else {
        created_at
    };
    RepositoryRecord {
        id: 1000 + index as u64,
        owner: format!("owner_{}", index),
        name: "repo".to_string(),
        default_branch: "main".to_string(),
        created_at: Some(created_at),
        updated_at: Some(pushed_at),
        pushed_at: Some(pushed_at),
        stars: index as u32,
        is_fork: true,
        ..RepositoryRecord::default()
    }
}

pub struct ScriptedApi {
    parent: RepositoryRecord,
    forks: Vec<RepositoryRecord>,
    ahead: HashMap<String, u32>,
    compare_failures: HashMap<String, fn() -> Error>,
    listing_failure: Option<(u32, fn() -> Error)>,
    call_delay: Duration,
    pub repository_calls: AtomicU32,
    pub fork_page_calls: AtomicU32,
    pub compare_calls: AtomicU32,
}

impl ScriptedApi {
    pub fn new(parent: RepositoryRecord, forks: Vec<RepositoryRecord>) -> Self {
        ScriptedApi {
            parent,
            forks,
            ahead: HashMap::new(),
            compare_failures: HashMap::new(),
            listing_failure: None,
            call_delay: Duration::ZERO,
            repository_calls: AtomicU32::new(0),
            fork_page_calls: AtomicU32::new(0),
            compare_calls: AtomicU32::new(0),
        }
    }

    /// Commits ahead reported for the fork owned by `owner`, 1 when not scripted.
    pub fn with_ahead(mut self, owner: &str, ahead: u32) -> Self {
        self.ahead.insert(owner.to_string(), ahead);
        self
    }

    pub fn with_compare_failure(mut self, owner: &str, failure: fn() -> Error) -> Self {
        self.compare_failures.insert(owner.to_string(), failure);
        self
    }

    /// Fails every fork listing page from `page` on.
    pub fn with_listing_failure(mut self, page: u32, failure: fn() -> Error) -> Self {
        self.listing_failure = Some((page, failure));
        self
    }

    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = delay;
        self
    }

    async fn delay(&self) {
        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }
    }
}

fn commits(owner: &str, count: u32) -> Vec<Commit> {
    (0..count)
        .map(|i| Commit {
            sha: format!("{:040x}", i + 1),
            message: format!("Change {} by {}\n\nDetails", i, owner),
            author: Some(owner.to_string()),
            date: Some(Utc::now()),
        })
        .collect()
}

#[async_trait]
impl RepositoryApi for ScriptedApi {
    async fn repository(&self, repo: &RepoKey) -> Result<RepositoryRecord> {
        self.repository_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if *repo == self.parent.key() {
            return Ok(self.parent.clone());
        }
        self.forks
            .iter()
            .find(|fork| fork.key() == *repo)
            .cloned()
            .ok_or_else(|| Error::NotFound(repo.to_string()))
    }

    async fn forks(&self, repo: &RepoKey, page: u32, per_page: u32) -> Result<Vec<RepositoryRecord>> {
        self.fork_page_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if *repo != self.parent.key() {
            return Err(Error::NotFound(repo.to_string()));
        }
        if let Some((from_page, failure)) = self.listing_failure {
            if page >= from_page {
                return Err(failure());
            }
        }
        let start = ((page.max(1) - 1) * per_page) as usize;
        let end = (start + per_page as usize).min(self.forks.len());
        Ok(self.forks.get(start..end).map(<[_]>::to_vec).unwrap_or_default())
    }

    async fn compare(&self, _repo: &RepoKey, _base: &str, head: &str) -> Result<Comparison> {
        self.compare_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        let owner = head.split(':').next().unwrap_or(head);
        if let Some(failure) = self.compare_failures.get(owner) {
            return Err(failure());
        }
        let ahead_by = self.ahead.get(owner).copied().unwrap_or(1);
        Ok(Comparison {
            status: if ahead_by > 0 {
                ComparisonStatus::Diverged
            } else {
                ComparisonStatus::Behind
            },
            ahead_by,
            behind_by: 2,
            commits: commits(owner, ahead_by),
        })
    }
}
