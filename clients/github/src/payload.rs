use chrono::{DateTime, Utc};
use fork_scout::model::{Commit, Comparison, ComparisonStatus, RepositoryRecord};
use serde::Deserialize;

#[derive(Deserialize, Debug)]
pub struct Repo {
    pub id: u64,
    pub name: String,
    pub owner: RepoOwner,
    #[serde(default)]
    pub default_branch: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub pushed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stargazers_count: u32,
    #[serde(default)]
    pub forks_count: u32,
    #[serde(default)]
    pub open_issues_count: u32,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub fork: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub private: bool,
    pub language: Option<String>,
    pub description: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct RepoOwner {
    pub login: String,
}

impl From<Repo> for RepositoryRecord {
    fn from(repo: Repo) -> Self {
        RepositoryRecord {
            id: repo.id,
            owner: repo.owner.login,
            name: repo.name,
            default_branch: repo.default_branch,
            created_at: repo.created_at,
            updated_at: repo.updated_at,
            pushed_at: repo.pushed_at,
            stars: repo.stargazers_count,
            forks_count: repo.forks_count,
            open_issues: repo.open_issues_count,
            size: repo.size,
            is_fork: repo.fork,
            archived: repo.archived,
            disabled: repo.disabled,
            private: repo.private,
            language: repo.language,
            description: repo.description,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct Compare {
    pub status: String,
    pub ahead_by: u32,
    pub behind_by: u32,
    #[serde(default)]
    pub commits: Vec<CompareCommit>,
}

#[derive(Deserialize, Debug)]
pub struct CompareCommit {
    pub sha: String,
    pub commit: CommitDetails,
    pub author: Option<RepoOwner>,
}

#[derive(Deserialize, Debug)]
pub struct CommitDetails {
    pub message: String,
    pub author: Option<CommitAuthor>,
}

#[derive(Deserialize, Debug)]
pub struct CommitAuthor {
    pub name: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

impl From<CompareCommit> for Commit {
    fn from(commit: CompareCommit) -> Self {
        let (name, date) = commit
            .commit
            .author
            .map(|author| (author.name, author.date))
            .unwrap_or_default();
        Commit {
            sha: commit.sha,
            message: commit.commit.message,
            author: commit.author.map(|author| author.login).or(name),
            date,
        }
    }
}

impl TryFrom<Compare> for Comparison {
    type Error = fork_scout::api::Error;

    fn try_from(compare: Compare) -> Result<Self, Self::Error> {
        let status = compare.status.parse::<ComparisonStatus>().map_err(|_| {
            fork_scout::api::Error::MalformedResponse(format!("Unknown comparison status {}", compare.status))
        })?;
        Ok(Comparison {
            status,
            ahead_by: compare.ahead_by,
            behind_by: compare.behind_by,
            commits: compare.commits.into_iter().map(Commit::from).collect(),
        })
    }
}

/// Body of a GitHub error response.
#[derive(Deserialize, Debug, Default)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
}
