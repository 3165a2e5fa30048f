use chrono::{DateTime, Utc};
use strum_macros::{Display, EnumString};

use crate::api::RepoKey;

/// Repository as reported by the remote API. Never mutated, replaced on refresh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepositoryRecord {
    pub id: u64,
    pub owner: String,
    pub name: String,
    pub default_branch: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub pushed_at: Option<DateTime<Utc>>,
    pub stars: u32,
    pub forks_count: u32,
    pub open_issues: u32,
    pub size: u64,
    pub is_fork: bool,
    pub archived: bool,
    pub disabled: bool,
    pub private: bool,
    pub language: Option<String>,
    pub description: Option<String>,
}

impl RepositoryRecord {
    pub fn key(&self) -> RepoKey {
        RepoKey::new(&self.owner, &self.name)
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub sha: String,
    pub message: String,
    pub author: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

impl Commit {
    /// First line of the commit message.
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }

    pub fn short_sha(&self) -> &str {
        &self.sha[..self.sha.len().min(7)]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ComparisonStatus {
    Ahead,
    Behind,
    Diverged,
    Identical,
}

/// Ahead/behind comparison of a fork against its parent.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub status: ComparisonStatus,
    pub ahead_by: u32,
    pub behind_by: u32,
    pub commits: Vec<Commit>,
}
