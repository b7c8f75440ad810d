//! Source-code host integration.
//!
//! Defines the [`SourceHost`] trait the review pipeline talks to, plus the
//! reqwest-backed GitHub implementation. The trait is the seam that lets
//! integration tests drive the pipeline with a scripted host instead of the
//! network.
//!
//! # Retry Strategy
//!
//! Transient errors use exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Non-success responses surface as [`UpstreamFailure`] values inside the
//! `anyhow` chain so the HTTP layer can recover the upstream status code.

use std::fmt;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::GithubConfig;

/// A non-success response from the source host, carrying the upstream
/// HTTP status so callers can classify the failure.
#[derive(Debug)]
pub struct UpstreamFailure {
    pub status: u16,
    pub message: String,
}

impl fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source host returned {}: {}", self.status, self.message)
    }
}

impl std::error::Error for UpstreamFailure {}

/// Authenticated user identity on the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostUser {
    pub login: String,
    pub id: i64,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Repository metadata returned by a verify lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoInfo {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub html_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrAuthor {
    pub login: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrHead {
    pub sha: String,
    #[serde(rename = "ref", default)]
    pub branch: String,
}

/// One entry in a repository's pull request listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestSummary {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub user: PrAuthor,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Full pull request metadata, including the head commit the recheck
/// decision keys on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestDetails {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub state: String,
    pub user: PrAuthor,
    pub head: PrHead,
}

/// One changed file in a pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestFile {
    pub filename: String,
    pub status: String,
    pub additions: u64,
    pub deletions: u64,
    #[serde(default)]
    pub patch: Option<String>,
    #[serde(default)]
    pub raw_url: String,
}

/// Operations the review pipeline needs from a source-code host.
#[async_trait]
pub trait SourceHost: Send + Sync {
    /// Exchange an OAuth authorization code for an access token.
    async fn exchange_code(&self, code: &str) -> Result<String>;

    /// Fetch the authenticated user's identity.
    async fn fetch_user(&self, token: &str) -> Result<HostUser>;

    /// Check that a repository exists and is accessible with this token.
    async fn verify_repo(&self, token: &str, owner: &str, repo: &str) -> Result<RepoInfo>;

    /// List the repository's pull requests (all states).
    async fn list_pull_requests(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<PullRequestSummary>>;

    /// Fetch one pull request's metadata, including its head commit.
    async fn fetch_pr(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<PullRequestDetails>;

    /// Fetch the pull request's changed files with patch text.
    async fn fetch_pr_files(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<PullRequestFile>>;

    /// Fetch raw file content by URL (backend proxy for the UI).
    async fn fetch_raw_file(&self, token: &str, raw_url: &str) -> Result<String>;

    /// Current head commit SHA for a pull request.
    async fn fetch_pr_head(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<String> {
        Ok(self.fetch_pr(token, owner, repo, number).await?.head.sha)
    }
}

// ============ GitHub implementation ============

/// [`SourceHost`] backed by the GitHub REST API.
pub struct GitHubHost {
    config: GithubConfig,
    client: reqwest::Client,
}

impl GitHubHost {
    pub fn new(config: GithubConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    /// GET a GitHub API path with retry/backoff, returning the response body.
    async fn get_with_retry(&self, url: &str, token: &str) -> Result<reqwest::Response> {
        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .get(url)
                .header("Authorization", format!("Bearer {token}"))
                .header("Accept", "application/vnd.github+json")
                .header("User-Agent", "review-harness")
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::Error::new(UpstreamFailure {
                            status: status.as_u16(),
                            message: body_text,
                        }));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    return Err(anyhow::Error::new(UpstreamFailure {
                        status: status.as_u16(),
                        message: body_text,
                    }));
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("GitHub request failed after retries")))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str, token: &str) -> Result<T> {
        let response = self.get_with_retry(url, token).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl SourceHost for GitHubHost {
    async fn exchange_code(&self, code: &str) -> Result<String> {
        let client_secret = self.config.resolved_client_secret()?;

        let resp = self
            .client
            .post(format!("{}/login/oauth/access_token", self.config.oauth_base))
            .header("Accept", "application/json")
            .header("User-Agent", "review-harness")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(anyhow::Error::new(UpstreamFailure {
                status: status.as_u16(),
                message: body_text,
            }));
        }

        let body: Value = resp.json().await?;
        match body.get("access_token").and_then(|t| t.as_str()) {
            Some(token) => Ok(token.to_string()),
            None => bail!(
                "token exchange response contained no access_token: {}",
                body.get("error_description")
                    .and_then(|e| e.as_str())
                    .unwrap_or("no error description")
            ),
        }
    }

    async fn fetch_user(&self, token: &str) -> Result<HostUser> {
        self.get_json(&format!("{}/user", self.config.api_base), token)
            .await
    }

    async fn verify_repo(&self, token: &str, owner: &str, repo: &str) -> Result<RepoInfo> {
        self.get_json(
            &format!("{}/repos/{}/{}", self.config.api_base, owner, repo),
            token,
        )
        .await
    }

    async fn list_pull_requests(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<PullRequestSummary>> {
        self.get_json(
            &format!(
                "{}/repos/{}/{}/pulls?state=all&per_page=100",
                self.config.api_base, owner, repo
            ),
            token,
        )
        .await
    }

    async fn fetch_pr(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<PullRequestDetails> {
        self.get_json(
            &format!(
                "{}/repos/{}/{}/pulls/{}",
                self.config.api_base, owner, repo, number
            ),
            token,
        )
        .await
    }

    async fn fetch_pr_files(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<PullRequestFile>> {
        self.get_json(
            &format!(
                "{}/repos/{}/{}/pulls/{}/files?per_page=100",
                self.config.api_base, owner, repo, number
            ),
            token,
        )
        .await
    }

    async fn fetch_raw_file(&self, token: &str, raw_url: &str) -> Result<String> {
        let response = self.get_with_retry(raw_url, token).await?;
        Ok(response.text().await?)
    }
}

/// Pull the upstream HTTP status out of an error chain, if the failure
/// originated at the source host.
pub fn upstream_status(err: &anyhow::Error) -> Option<u16> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<UpstreamFailure>())
        .map(|failure| failure.status)
}
