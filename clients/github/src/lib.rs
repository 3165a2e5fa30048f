//! GitHub REST implementation of the fork discovery `RepositoryApi`.

mod builder;
mod payload;
mod rate_limit;

use async_trait::async_trait;
use derive_more::Constructor;
use fork_scout::api::{Error, RepoKey, RepositoryApi, Result};
use fork_scout::model::{Comparison, RepositoryRecord};
use log::debug;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;

pub use builder::{GithubClientBuilder, DEFAULT_GITHUB_URL};

#[derive(Constructor)]
pub struct GithubClient {
    client: Client,
    github_url: String,
}

impl GithubClient {
    pub fn github_url(&self) -> &str {
        &self.github_url
    }

    async fn get<T: DeserializeOwned>(&self, request_url: String, query: &[(&str, String)]) -> Result<T> {
        debug!("GET {}", request_url);
        let response = self
            .client
            .get(request_url)
            .query(query)
            .send()
            .await
            .map_err(request_error)?;
        read_response(response).await
    }
}

#[async_trait]
impl RepositoryApi for GithubClient {
    async fn repository(&self, repo: &RepoKey) -> Result<RepositoryRecord> {
        let request_url = format!("{}/repos/{}/{}", self.github_url, repo.owner, repo.name);
        let repo = self.get::<payload::Repo>(request_url, &[]).await?;
        Ok(repo.into())
    }

    async fn forks(&self, repo: &RepoKey, page: u32, per_page: u32) -> Result<Vec<RepositoryRecord>> {
        let request_url = format!("{}/repos/{}/{}/forks", self.github_url, repo.owner, repo.name);
        let forks = self
            .get::<Vec<payload::Repo>>(
                request_url,
                &[
                    ("sort", "newest".to_string()),
                    ("page", page.to_string()),
                    ("per_page", per_page.to_string()),
                ],
            )
            .await?;
        Ok(forks.into_iter().map(RepositoryRecord::from).collect())
    }

    async fn compare(&self, repo: &RepoKey, base: &str, head: &str) -> Result<Comparison> {
        let request_url = format!(
            "{}/repos/{}/{}/compare/{}...{}",
            self.github_url, repo.owner, repo.name, base, head
        );
        let compare = self.get::<payload::Compare>(request_url, &[]).await?;
        Comparison::try_from(compare)
    }
}

/// Maps the response status onto the error taxonomy and decodes the body of a successful response.
pub(crate) async fn read_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|err| Error::MalformedResponse(err.to_string()));
    }

    let rate_limited = rate_limit::is_rate_limited(status, response.headers());
    let signal = rate_limit::rate_limit_signal(response.headers());
    let url = response.url().to_string();
    let body = response.json::<payload::ErrorBody>().await.unwrap_or_default();
    let message = if body.message.is_empty() {
        format!("{} {}", status, url)
    } else {
        format!("{} {}: {}", status, url, body.message)
    };
    Err(match status {
        _ if rate_limited => Error::RateLimitExceeded { message, signal },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Authentication(message),
        StatusCode::NOT_FOUND => Error::NotFound(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => Error::MalformedRequest(message),
        status if status.is_server_error() => Error::TransientNetwork(message),
        _ => Error::Other(anyhow::anyhow!(message)),
    })
}

fn request_error(err: reqwest::Error) -> Error {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        Error::TransientNetwork(err.to_string())
    } else if err.is_builder() {
        Error::MalformedRequest(err.to_string())
    } else {
        Error::Other(err.into())
    }
}
