//! # Review Harness CLI (`rev`)
//!
//! The `rev` binary is the primary interface for Review Harness. It
//! provides commands for database initialization, running the HTTP API
//! server, and one-shot pull request analysis from the terminal.
//!
//! ## Usage
//!
//! ```bash
//! rev --config ./config/rev.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rev init` | Create the SQLite database and run schema migrations |
//! | `rev serve` | Start the HTTP API server |
//! | `rev review <owner> <repo> <number>` | Analyze one pull request and print the result |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! rev init --config ./config/rev.toml
//!
//! # Start the API server
//! rev serve --config ./config/rev.toml
//!
//! # One-shot review (token from GITHUB_TOKEN)
//! rev review alice demo 42 --config ./config/rev.toml
//! ```

mod auth;
mod cache;
mod config;
mod db;
mod history;
mod host;
mod identity;
mod merge;
mod migrate;
mod models;
mod parse;
mod review;
mod reviewer;
mod server;
#[allow(dead_code)]
mod store;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::host::{GitHubHost, SourceHost};
use crate::models::ScopeKey;
use crate::review::ReviewState;
use crate::reviewer::{create_reviewer, Reviewer};

/// Review Harness CLI — an AI-assisted pull request review service.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rev.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rev",
    about = "Review Harness — an AI-assisted pull request review service",
    version,
    long_about = "Review Harness signs users in with GitHub OAuth, browses repositories and \
    pull requests, sends PR diffs to a language-model reviewer, and returns structured \
    findings with stable cross-run identities and commit-keyed result caching."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rev.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (users,
    /// repositories, contributors, pull_requests, issues). This command is
    /// idempotent — running it multiple times is safe.
    Init,

    /// Start the HTTP API server.
    ///
    /// Binds to the address configured in `[server].bind` and serves the
    /// OAuth, browsing, and analysis endpoints.
    Serve,

    /// Analyze one pull request and print the structured result as JSON.
    ///
    /// Reads the GitHub access token from the `GITHUB_TOKEN` environment
    /// variable. Within one invocation the analysis cache is cold, so this
    /// always runs the full pipeline.
    Review {
        /// Repository owner (user or organization).
        owner: String,

        /// Repository name.
        repo: String,

        /// Pull request number.
        number: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "review_harness=info,rev=info".into()),
        )
        .init();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;

            let host: Arc<dyn SourceHost> = Arc::new(GitHubHost::new(cfg.github.clone())?);
            let reviewer: Arc<dyn Reviewer> = Arc::from(create_reviewer(&cfg.reviewer)?);
            let state = server::AppState::new(
                Arc::new(cfg),
                pool,
                Arc::new(ReviewState::new()),
                host,
                reviewer,
            );

            server::run_server(state).await?;
        }
        Commands::Review {
            owner,
            repo,
            number,
        } => {
            let token = std::env::var("GITHUB_TOKEN")
                .context("GITHUB_TOKEN environment variable not set")?;

            let host = GitHubHost::new(cfg.github.clone())?;
            let reviewer = create_reviewer(&cfg.reviewer)?;
            let state = ReviewState::new();
            let scope = ScopeKey::new(owner, repo, number);

            let outcome = review::run_review(
                &state,
                &host,
                reviewer.as_ref(),
                &cfg.reviewer,
                &token,
                &scope,
            )
            .await?;

            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
    }

    Ok(())
}
