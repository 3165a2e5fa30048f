use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_more::Constructor;
use thiserror::Error;
use url::Url;

use crate::model::{Comparison, RepositoryRecord};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Rate limit exceeded: {message}")]
    RateLimitExceeded { message: String, signal: RateLimitSignal },
    #[error("Transient network failure: {0}")]
    TransientNetwork(String),
    #[error("Authentication failure: {0}")]
    Authentication(String),
    #[error("Resource not found: {0}")]
    NotFound(String),
    #[error("Malformed request: {0}")]
    MalformedRequest(String),
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    #[error("Circuit open, call to {0} rejected")]
    CircuitOpen(String),
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        source: Box<Error>,
    },
    #[error("Invalid repository identifier: {0}")]
    InvalidRepository(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Rate limits and transient network failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RateLimitExceeded { .. } | Error::TransientNetwork(_))
    }

    /// Whether the failure says something about the remote endpoint rather than about the caller's input.
    pub fn affects_endpoint_health(&self) -> bool {
        matches!(
            self,
            Error::RateLimitExceeded { .. } | Error::TransientNetwork(_) | Error::MalformedResponse(_)
        )
    }

    pub fn rate_limit_signal(&self) -> Option<&RateLimitSignal> {
        match self {
            Error::RateLimitExceeded { signal, .. } => Some(signal),
            _ => None,
        }
    }

    /// Error that caused the failure, looking through `RetriesExhausted`.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::RetriesExhausted { source, .. } => source.root_cause(),
            err => err,
        }
    }
}

/// Quota information read from a rate limited response.
#[derive(Constructor, Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitSignal {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub reset: Option<DateTime<Utc>>,
}

impl RateLimitSignal {
    /// Time left until the quota resets, if the reset lies in the future.
    pub fn reset_in(&self, now: DateTime<Utc>) -> Option<Duration> {
        let reset = self.reset?;
        (reset - now).to_std().ok().filter(|wait| !wait.is_zero())
    }
}

/// Repository identity as `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoKey {
    pub owner: String,
    pub name: String,
}

impl RepoKey {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        RepoKey {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parses `owner/name`, an `http(s)://host/owner/name` URL or a `git@host:owner/name` remote.
    /// A trailing `.git` or `/` is ignored.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let invalid = || Error::InvalidRepository(input.to_string());
        let path = if let Some(remote) = input.strip_prefix("git@") {
            remote.split_once(':').map(|(_, path)| path.to_string())
        } else if input.contains("://") {
            Url::parse(input).ok().map(|url| url.path().to_string())
        } else {
            Some(input.to_string())
        }
        .ok_or_else(invalid)?;

        let path = path.trim_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);
        let mut segments = path.split('/');
        match (segments.next(), segments.next(), segments.next()) {
            (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty() => Ok(RepoKey::new(owner, name)),
            _ => Err(invalid()),
        }
    }
}

impl Display for RepoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Remote repository API. Exactly the call shapes fork discovery needs.
#[async_trait]
pub trait RepositoryApi: Send + Sync {
    const FIRST_PAGE_NUMBER: u32 = 1;
    const MAX_PAGE_SIZE: u32 = 100;

    /// Single repository lookup.
    async fn repository(&self, repo: &RepoKey) -> Result<RepositoryRecord>;

    /// One page of the forks of `repo`.
    async fn forks(&self, repo: &RepoKey, page: u32, per_page: u32) -> Result<Vec<RepositoryRecord>>;

    /// Compares `base` of `repo` with `head`, where `head` may be `owner:branch` of a fork.
    async fn compare(&self, repo: &RepoKey, base: &str, head: &str) -> Result<Comparison>;
}
