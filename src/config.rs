use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    pub github: GithubConfig,
    #[serde(default)]
    pub reviewer: ReviewerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    pub client_id: String,
    /// OAuth client secret. May be left empty in the config file and
    /// supplied via `GITHUB_CLIENT_SECRET` instead.
    #[serde(default)]
    pub client_secret: String,
    pub redirect_uri: String,
    /// Secret used to sign the OAuth `state` parameter.
    pub state_secret: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_oauth_base")]
    pub oauth_base: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}
fn default_oauth_base() -> String {
    "https://github.com".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReviewerConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_reviewer_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-file cap on patch text included in the review prompt.
    #[serde(default = "default_max_patch_bytes")]
    pub max_patch_bytes: usize,
}

impl Default for ReviewerConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            timeout_secs: default_reviewer_timeout_secs(),
            max_retries: default_max_retries(),
            max_patch_bytes: default_max_patch_bytes(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_reviewer_timeout_secs() -> u64 {
    90
}
fn default_max_patch_bytes() -> usize {
    6000
}

impl GithubConfig {
    /// Resolve the OAuth client secret from config or environment.
    pub fn resolved_client_secret(&self) -> Result<String> {
        if !self.client_secret.is_empty() {
            return Ok(self.client_secret.clone());
        }
        std::env::var("GITHUB_CLIENT_SECRET")
            .context("github.client_secret not set and GITHUB_CLIENT_SECRET missing from environment")
    }
}

impl ReviewerConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate server
    if config.server.bind.is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }

    // Validate github
    if config.github.client_id.is_empty() {
        anyhow::bail!("github.client_id must not be empty");
    }
    if config.github.redirect_uri.is_empty() {
        anyhow::bail!("github.redirect_uri must not be empty");
    }
    if config.github.state_secret.is_empty() {
        anyhow::bail!("github.state_secret must not be empty");
    }
    if config.github.timeout_secs == 0 {
        anyhow::bail!("github.timeout_secs must be > 0");
    }

    // Validate reviewer
    if config.reviewer.is_enabled() && config.reviewer.model.is_none() {
        anyhow::bail!(
            "reviewer.model must be specified when provider is '{}'",
            config.reviewer.provider
        );
    }
    if config.reviewer.timeout_secs == 0 {
        anyhow::bail!("reviewer.timeout_secs must be > 0");
    }
    if config.reviewer.max_patch_bytes == 0 {
        anyhow::bail!("reviewer.max_patch_bytes must be > 0");
    }

    match config.reviewer.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown reviewer provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}
