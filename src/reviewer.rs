//! Reviewer provider abstraction and implementations.
//!
//! Defines the [`Reviewer`] trait and concrete implementations:
//! - **[`DisabledReviewer`]** — returns errors; used when no provider is
//!   configured, so the server can still serve non-analysis endpoints.
//! - **[`OpenAiReviewer`]** — calls the OpenAI chat completions API with
//!   retry and backoff.
//!
//! The reviewer is an external black box that returns loosely structured
//! text; interpreting that text is the parsing module's job, not this one's.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::fmt;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::config::ReviewerConfig;
use crate::host::{PullRequestDetails, PullRequestFile};

/// A failed model invocation (non-success response, or timeout), kept
/// distinct from source-host failures so the HTTP layer can classify it.
#[derive(Debug)]
pub struct ReviewerFailure {
    pub status: Option<u16>,
    pub message: String,
}

impl fmt::Display for ReviewerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "reviewer returned {}: {}", status, self.message),
            None => write!(f, "reviewer call failed: {}", self.message),
        }
    }
}

impl std::error::Error for ReviewerFailure {}

/// Trait for review providers.
#[async_trait]
pub trait Reviewer: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Send the review prompt and return the raw response text.
    async fn review(&self, prompt: &str) -> Result<String>;
}

// ============ Disabled Reviewer ============

/// A no-op reviewer that always returns errors.
pub struct DisabledReviewer;

#[async_trait]
impl Reviewer for DisabledReviewer {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn review(&self, _prompt: &str) -> Result<String> {
        bail!("Reviewer provider is disabled")
    }
}

// ============ OpenAI Reviewer ============

/// Reviewer backed by the OpenAI chat completions API.
///
/// Requires the `OPENAI_API_KEY` environment variable to be set.
pub struct OpenAiReviewer {
    model: String,
    timeout_secs: u64,
    max_retries: u32,
}

impl OpenAiReviewer {
    pub fn new(config: &ReviewerConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("reviewer.model required for OpenAI provider"))?;

        // Verify API key is available
        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        Ok(Self {
            model,
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Reviewer for OpenAiReviewer {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn review(&self, prompt: &str) -> Result<String> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You are a code review assistant. Respond with a single JSON object and nothing else."
                },
                { "role": "user", "content": prompt }
            ],
            "temperature": 0.2,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post("https://api.openai.com/v1/chat/completions")
                .header("Authorization", format!("Bearer {api_key}"))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: Value = response.json().await?;
                        return extract_completion_text(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::Error::new(ReviewerFailure {
                            status: Some(status.as_u16()),
                            message: body_text,
                        }));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    return Err(anyhow::Error::new(ReviewerFailure {
                        status: Some(status.as_u16()),
                        message: body_text,
                    }));
                }
                Err(e) => {
                    last_err = Some(anyhow::Error::new(ReviewerFailure {
                        status: None,
                        message: e.to_string(),
                    }));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Reviewer call failed after retries")))
    }
}

/// Pull the assistant message text out of a chat completions response.
fn extract_completion_text(json: &Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid completions response: missing message content"))
}

/// Create the appropriate [`Reviewer`] based on configuration.
pub fn create_reviewer(config: &ReviewerConfig) -> Result<Box<dyn Reviewer>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledReviewer)),
        "openai" => Ok(Box::new(OpenAiReviewer::new(config)?)),
        other => bail!("Unknown reviewer provider: {}", other),
    }
}

// ============ Prompt construction ============

/// Build the review prompt from PR metadata and changed files.
///
/// Each file's patch is truncated to `max_patch_bytes` so oversized diffs
/// cannot blow the request.
pub fn build_prompt(
    details: &PullRequestDetails,
    files: &[PullRequestFile],
    max_patch_bytes: usize,
) -> String {
    let mut prompt = String::new();

    prompt.push_str(
        "Review the following pull request diff. Report problems as a JSON object with \
         exactly these keys: \"security_issues\", \"code_quality_issues\", \
         \"performance_issues\" (arrays of objects with \"severity\" [high|medium|low], \
         \"description\", \"file\", \"suggestion\"), and \"summary\" (string). \
         Use the file path from the diff, or \"PR metadata\" for issues with the \
         title or description.\n\n",
    );

    prompt.push_str(&format!("Title: {}\n", details.title));
    if let Some(body) = &details.body {
        if !body.trim().is_empty() {
            prompt.push_str(&format!("Description: {}\n", body.trim()));
        }
    }
    prompt.push('\n');

    for file in files {
        prompt.push_str(&format!(
            "--- {} ({}, +{} -{})\n",
            file.filename, file.status, file.additions, file.deletions
        ));
        match &file.patch {
            Some(patch) => {
                prompt.push_str(truncate_patch(patch, max_patch_bytes));
                if patch.len() > max_patch_bytes {
                    prompt.push_str("\n[patch truncated]");
                }
            }
            None => prompt.push_str("[no textual diff available]"),
        }
        prompt.push_str("\n\n");
    }

    prompt
}

/// Truncate patch text to a byte budget without splitting a UTF-8 char.
fn truncate_patch(patch: &str, max_bytes: usize) -> &str {
    if patch.len() <= max_bytes {
        return patch;
    }
    let mut end = max_bytes;
    while end > 0 && !patch.is_char_boundary(end) {
        end -= 1;
    }
    &patch[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{PrAuthor, PrHead};

    fn details() -> PullRequestDetails {
        PullRequestDetails {
            number: 42,
            title: "Add caching".to_string(),
            body: Some("Speeds up repeated lookups.".to_string()),
            state: "open".to_string(),
            user: PrAuthor {
                login: "alice".to_string(),
            },
            head: PrHead {
                sha: "abc123".to_string(),
                branch: "feature/cache".to_string(),
            },
        }
    }

    fn file(name: &str, patch: Option<&str>) -> PullRequestFile {
        PullRequestFile {
            filename: name.to_string(),
            status: "modified".to_string(),
            additions: 3,
            deletions: 1,
            patch: patch.map(str::to_string),
            raw_url: String::new(),
        }
    }

    #[test]
    fn prompt_includes_metadata_and_patches() {
        let files = vec![file("src/cache.rs", Some("@@ -1 +1 @@\n-old\n+new"))];
        let prompt = build_prompt(&details(), &files, 6000);

        assert!(prompt.contains("Title: Add caching"));
        assert!(prompt.contains("Speeds up repeated lookups."));
        assert!(prompt.contains("src/cache.rs"));
        assert!(prompt.contains("+new"));
        assert!(prompt.contains("security_issues"));
    }

    #[test]
    fn prompt_truncates_large_patches() {
        let big_patch = "x".repeat(10_000);
        let files = vec![file("big.rs", Some(&big_patch))];
        let prompt = build_prompt(&details(), &files, 100);

        assert!(prompt.contains("[patch truncated]"));
        assert!(!prompt.contains(&big_patch));
    }

    #[test]
    fn prompt_handles_missing_patch() {
        let files = vec![file("image.png", None)];
        let prompt = build_prompt(&details(), &files, 6000);
        assert!(prompt.contains("[no textual diff available]"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let patch = "ééééé"; // 2 bytes per char
        assert_eq!(truncate_patch(patch, 5), "éé");
        assert_eq!(truncate_patch(patch, 10), patch);
    }

    #[test]
    fn completion_text_extracted() {
        let json = serde_json::json!({
            "choices": [{ "message": { "content": "{\"summary\": \"ok\"}" } }]
        });
        assert_eq!(
            extract_completion_text(&json).unwrap(),
            "{\"summary\": \"ok\"}"
        );
    }

    #[test]
    fn missing_completion_text_errors() {
        let json = serde_json::json!({ "choices": [] });
        assert!(extract_completion_text(&json).is_err());
    }

    #[tokio::test]
    async fn disabled_reviewer_errors() {
        let err = DisabledReviewer.review("prompt").await.unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }
}
