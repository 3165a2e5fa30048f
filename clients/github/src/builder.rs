use std::time::Duration;

use fork_scout::api::Result;
use reqwest::header;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderName;
use reqwest::header::HeaderValue;
use reqwest::ClientBuilder;
use secrecy::ExposeSecret;

use crate::GithubClient;

pub const DEFAULT_GITHUB_URL: &str = "https://api.github.com";

pub struct GithubClientBuilder {
    client_builder: ClientBuilder,
    github_url: String,
    headers: HeaderMap,
}

impl Default for GithubClientBuilder {
    fn default() -> Self {
        let mut headers = HeaderMap::default();
        headers.insert(header::USER_AGENT, HeaderValue::from_static("fork-scout"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/vnd.github.v3+json"));
        Self {
            client_builder: ClientBuilder::default(),
            github_url: DEFAULT_GITHUB_URL.to_string(),
            headers,
        }
    }
}

impl GithubClientBuilder {
    pub fn try_with_token(self, token: secrecy::SecretString) -> Result<GithubClientBuilder> {
        let value = format!("token {}", token.expose_secret());
        let builder = self.try_with_header(header::AUTHORIZATION, value)?;
        Ok(builder)
    }

    pub fn with_github_url<STR: AsRef<str>>(mut self, url: STR) -> GithubClientBuilder {
        self.github_url = url.as_ref().trim_end_matches('/').to_string();
        self
    }

    /// Timeout of the whole request, connect included.
    pub fn with_timeout(mut self, timeout: Duration) -> GithubClientBuilder {
        self.client_builder = self.client_builder.timeout(timeout);
        self
    }

    fn try_with_header(mut self, key: HeaderName, val: impl AsRef<str>) -> anyhow::Result<GithubClientBuilder> {
        let mut val = HeaderValue::from_str(val.as_ref())?;
        if key == header::AUTHORIZATION {
            val.set_sensitive(true);
        }
        self.headers.insert(key, val);
        Ok(self)
    }

    pub fn build(self) -> Result<GithubClient> {
        let client = self
            .client_builder
            .default_headers(self.headers)
            .build()
            .map_err(anyhow::Error::from)?;
        Ok(GithubClient::new(client, self.github_url))
    }
}
