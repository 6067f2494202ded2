//! Minimal GitHub REST client: repository search and issue creation


use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::config::GitHubConfig;

/// Results per page for repository search
pub const SEARCH_PAGE_SIZE: u32 = 10;

const API_VERSION: &str = "2022-11-28";

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("GitHub token is not configured")]
    NotConfigured,

    #[error("Invalid GitHub configuration: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("GitHub request failed: {0}")]
    Request(String),

    #[error("GitHub API returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse GitHub response: {0}")]
    Parse(String),
}

/// The fields of a repository the tools report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Repository {
    pub full_name: String,
    pub description: Option<String>,
    pub url: String,
    pub stars: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub number: u64,
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    items: Vec<RepositoryItem>,
}

#[derive(Debug, Deserialize)]
struct RepositoryItem {
    full_name: String,
    description: Option<String>,
    html_url: String,
    #[serde(default)]
    stargazers_count: u64,
}

#[derive(Debug, Serialize)]
struct NewIssue<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    number: u64,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Debug, Clone)]
pub struct GitHubClient {
    api_url: Url,
    token: String,
    client: reqwest::Client,
}

impl GitHubClient {
    #[inline]
    pub fn new(config: &GitHubConfig) -> Result<Self, GitHubError> {
        let token = config
            .token
            .clone()
            .filter(|token| !token.trim().is_empty())
            .ok_or(GitHubError::NotConfigured)?;

        let mut api_url = Url::parse(&config.api_url)
            .map_err(|e| GitHubError::Config(format!("{}: {}", config.api_url, e)))?;
        if !api_url.path().ends_with('/') {
            let path = format!("{}/", api_url.path());
            api_url.set_path(&path);
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            )),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static(API_VERSION),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GitHubError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_url,
            token,
            client,
        })
    }

    /// First page of repositories matching `query`, best match first
    pub async fn search_repositories(&self, query: &str) -> Result<Vec<Repository>, GitHubError> {
        if query.trim().is_empty() {
            return Err(GitHubError::InvalidArgument(
                "query must not be empty".to_string(),
            ));
        }

        let url = self.endpoint(&["search", "repositories"])?;
        let per_page = SEARCH_PAGE_SIZE.to_string();
        debug!("Searching GitHub repositories for '{}'", query);

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .query(&[("q", query), ("per_page", per_page.as_str())])
            .send()
            .await
            .map_err(|e| GitHubError::Request(e.to_string()))?;

        let body = read_success(response).await?;
        let parsed: SearchResponse =
            serde_json::from_str(&body).map_err(|e| GitHubError::Parse(e.to_string()))?;

        Ok(parsed
            .items
            .into_iter()
            .map(|item| Repository {
                full_name: item.full_name,
                description: item.description,
                url: item.html_url,
                stars: item.stargazers_count,
            })
            .collect())
    }

    pub async fn create_issue(
        &self,
        owner: &str,
        repo: &str,
        title: &str,
        body: &str,
    ) -> Result<Issue, GitHubError> {
        check_path_segment("owner", owner)?;
        check_path_segment("repo", repo)?;
        if title.trim().is_empty() {
            return Err(GitHubError::InvalidArgument(
                "title must not be empty".to_string(),
            ));
        }

        let url = self.endpoint(&["repos", owner, repo, "issues"])?;

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&NewIssue { title, body })
            .send()
            .await
            .map_err(|e| GitHubError::Request(e.to_string()))?;

        let body = read_success(response).await?;
        let created: IssueResponse =
            serde_json::from_str(&body).map_err(|e| GitHubError::Parse(e.to_string()))?;

        info!("Created issue #{} in {}/{}", created.number, owner, repo);
        Ok(Issue {
            number: created.number,
            url: created.html_url,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, GitHubError> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|()| GitHubError::Config(format!("{} cannot be a base URL", self.api_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

fn check_path_segment(name: &str, value: &str) -> Result<(), GitHubError> {
    if value.trim().is_empty() || value.contains('/') {
        return Err(GitHubError::InvalidArgument(format!(
            "{name} must be a single non-empty path segment"
        )));
    }
    Ok(())
}

async fn read_success(response: reqwest::Response) -> Result<String, GitHubError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| GitHubError::Request(e.to_string()))?;

    if status.is_success() {
        return Ok(body);
    }

    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|error| error.message)
        .unwrap_or_else(|_| body.trim().to_string());
    Err(GitHubError::Api {
        status: status.as_u16(),
        message,
    })
}
