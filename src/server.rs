//! HTTP API server.
//!
//! Exposes the review harness over a JSON HTTP API consumed by the web UI:
//! GitHub OAuth sign-in, repository and pull request browsing, and the
//! analyze/recheck/resolve flow around the analysis cache.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/login` | Redirect to GitHub's OAuth authorize page |
//! | `GET`  | `/login/callback` | Exchange the OAuth code, upsert the user |
//! | `GET`  | `/verify-repo` | Check a repository exists and is accessible |
//! | `GET`  | `/repo-pull-requests` | List a repository's pull requests |
//! | `GET`  | `/pr-details` | PR metadata plus changed files |
//! | `GET`  | `/file-content` | Proxy raw file content (CORS workaround) |
//! | `POST` | `/analyze/{owner}/{repo}/{number}` | Run or reuse an analysis |
//! | `POST` | `/recheck/{owner}/{repo}/{number}` | Same decision procedure; answers `no_changes` when the head commit is unchanged |
//! | `POST` | `/resolve/{owner}/{repo}/{number}/{identity}` | Mark a finding fixed |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! All error responses use the same envelope:
//!
//! ```json
//! { "error": { "code": "upstream_error", "message": "source host returned 502: ..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found`
//! (404), `upstream_error` (502), `reviewer_error` (502), `internal` (500).
//! Unparseable reviewer output is *not* an error: it surfaces as a
//! `degraded` analysis body with HTTP 200.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted; the browser UI runs on
//! a different origin during development.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::auth;
use crate::config::Config;
use crate::host::{
    upstream_status, HostUser, PullRequestDetails, PullRequestFile, PullRequestSummary, RepoInfo,
    SourceHost,
};
use crate::models::ScopeKey;
use crate::review::{run_review, ReviewOutcome, ReviewState};
use crate::reviewer::{Reviewer, ReviewerFailure};
use crate::store;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    pool: SqlitePool,
    review: Arc<ReviewState>,
    host: Arc<dyn SourceHost>,
    reviewer: Arc<dyn Reviewer>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        pool: SqlitePool,
        review: Arc<ReviewState>,
        host: Arc<dyn SourceHost>,
        reviewer: Arc<dyn Reviewer>,
    ) -> Self {
        Self {
            config,
            pool,
            review,
            host,
            reviewer,
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/login", get(handle_login))
        .route("/login/callback", get(handle_login_callback))
        .route("/verify-repo", get(handle_verify_repo))
        .route("/repo-pull-requests", get(handle_repo_pull_requests))
        .route("/pr-details", get(handle_pr_details))
        .route("/file-content", get(handle_file_content))
        .route("/analyze/{owner}/{repo}/{number}", post(handle_analyze))
        .route("/recheck/{owner}/{repo}/{number}", post(handle_analyze))
        .route(
            "/resolve/{owner}/{repo}/{number}/{identity}",
            post(handle_resolve),
        )
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server on the configured bind address.
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let bind_addr = state.config.server.bind.clone();
    let app = router(state);

    info!(bind = %bind_addr, "review harness listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn unauthorized(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Map a pipeline error to the most appropriate HTTP response.
///
/// Upstream 401/403/404 are the caller's problem (bad token, missing repo)
/// and keep their nature; other upstream and reviewer failures surface as
/// 502 so the UI can distinguish "our bug" from "their outage."
fn classify_error(err: anyhow::Error) -> AppError {
    if let Some(status) = upstream_status(&err) {
        return match status {
            401 | 403 => unauthorized(format!("{err:#}")),
            404 => not_found(format!("{err:#}")),
            _ => AppError {
                status: StatusCode::BAD_GATEWAY,
                code: "upstream_error".to_string(),
                message: format!("{err:#}"),
            },
        };
    }

    if err
        .chain()
        .any(|cause| cause.downcast_ref::<ReviewerFailure>().is_some())
    {
        return AppError {
            status: StatusCode::BAD_GATEWAY,
            code: "reviewer_error".to_string(),
            message: format!("{err:#}"),
        };
    }

    error!(error = %format!("{err:#}"), "unclassified pipeline error");
    internal(format!("{err:#}"))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /login and /login/callback ============

async fn handle_login(State(state): State<AppState>) -> Redirect {
    Redirect::temporary(&auth::authorize_url(&state.config.github))
}

#[derive(Deserialize)]
struct CallbackParams {
    code: String,
    state: String,
}

#[derive(Serialize)]
struct CallbackResponse {
    user: HostUser,
    token: String,
}

async fn handle_login_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<CallbackResponse>, AppError> {
    auth::verify_state(&state.config.github.state_secret, &params.state)
        .map_err(|e| unauthorized(e.to_string()))?;

    let token = state
        .host
        .exchange_code(&params.code)
        .await
        .map_err(classify_error)?;

    let user = state.host.fetch_user(&token).await.map_err(classify_error)?;

    store::upsert_user_token(&state.pool, &user.login, &token)
        .await
        .map_err(|e| internal(e.to_string()))?;

    info!(user = %user.login, "oauth login completed");
    Ok(Json(CallbackResponse { user, token }))
}

// ============ Repository and PR browsing ============

#[derive(Deserialize)]
struct RepoParams {
    token: String,
    username: String,
    repo_name: String,
}

async fn handle_verify_repo(
    State(state): State<AppState>,
    Query(params): Query<RepoParams>,
) -> Result<Json<RepoInfo>, AppError> {
    let info = state
        .host
        .verify_repo(&params.token, &params.username, &params.repo_name)
        .await
        .map_err(classify_error)?;

    Ok(Json(info))
}

async fn handle_repo_pull_requests(
    State(state): State<AppState>,
    Query(params): Query<RepoParams>,
) -> Result<Json<Vec<PullRequestSummary>>, AppError> {
    let pulls = state
        .host
        .list_pull_requests(&params.token, &params.username, &params.repo_name)
        .await
        .map_err(classify_error)?;

    Ok(Json(pulls))
}

#[derive(Deserialize)]
struct PrParams {
    token: String,
    username: String,
    repo_name: String,
    pr_number: u64,
}

#[derive(Serialize)]
struct PrDetailsResponse {
    #[serde(flatten)]
    details: PullRequestDetails,
    files: Vec<PullRequestFile>,
}

async fn handle_pr_details(
    State(state): State<AppState>,
    Query(params): Query<PrParams>,
) -> Result<Json<PrDetailsResponse>, AppError> {
    let details = state
        .host
        .fetch_pr(
            &params.token,
            &params.username,
            &params.repo_name,
            params.pr_number,
        )
        .await
        .map_err(classify_error)?;

    let files = state
        .host
        .fetch_pr_files(
            &params.token,
            &params.username,
            &params.repo_name,
            params.pr_number,
        )
        .await
        .map_err(classify_error)?;

    Ok(Json(PrDetailsResponse { details, files }))
}

#[derive(Deserialize)]
struct FileContentParams {
    token: String,
    raw_url: String,
}

#[derive(Serialize)]
struct FileContentResponse {
    content: String,
}

async fn handle_file_content(
    State(state): State<AppState>,
    Query(params): Query<FileContentParams>,
) -> Result<Json<FileContentResponse>, AppError> {
    if params.raw_url.is_empty() {
        return Err(bad_request("raw_url must not be empty"));
    }

    let content = state
        .host
        .fetch_raw_file(&params.token, &params.raw_url)
        .await
        .map_err(classify_error)?;

    Ok(Json(FileContentResponse { content }))
}

// ============ POST /analyze and /recheck ============

#[derive(Deserialize)]
struct AnalyzeParams {
    token: String,
}

#[derive(Serialize)]
struct AnalyzeResponse {
    #[serde(flatten)]
    outcome: ReviewOutcome,
    /// Running score for the PR: the point total of its unresolved issues.
    score: i64,
}

async fn handle_analyze(
    State(state): State<AppState>,
    Path((owner, repo, number)): Path<(String, String, u64)>,
    Query(params): Query<AnalyzeParams>,
) -> Result<Json<AnalyzeResponse>, AppError> {
    let scope = ScopeKey::new(owner.clone(), repo.clone(), number);

    // Validates access before anything runs, and supplies the stable
    // GitHub repository id the persistence layer keys on.
    let repo_info = state
        .host
        .verify_repo(&params.token, &owner, &repo)
        .await
        .map_err(classify_error)?;

    let outcome = run_review(
        &state.review,
        state.host.as_ref(),
        state.reviewer.as_ref(),
        &state.config.reviewer,
        &params.token,
        &scope,
    )
    .await
    .map_err(classify_error)?;

    let score = persist_outcome(&state.pool, &repo_info, &scope, &outcome)
        .await
        .map_err(|e| internal(format!("failed to persist analysis: {e:#}")))?;

    Ok(Json(AnalyzeResponse { outcome, score }))
}

/// Record surfaced findings in the relational store and return the PR's
/// updated score. Cached and degraded outcomes record nothing new.
async fn persist_outcome(
    pool: &SqlitePool,
    repo_info: &RepoInfo,
    scope: &ScopeKey,
    outcome: &ReviewOutcome,
) -> anyhow::Result<i64> {
    let owner_user = match store::get_user_by_username(pool, &scope.owner).await? {
        Some(user) => user,
        None => store::create_user(pool, &scope.owner, None).await?,
    };

    let repo_row = match store::get_repository_by_github_id(pool, repo_info.id).await? {
        Some(repo) => repo,
        None => {
            store::create_repository(
                pool,
                owner_user.id,
                repo_info.id,
                &repo_info.name,
                &repo_info.full_name,
            )
            .await?
        }
    };

    if store::get_contributor(pool, owner_user.id, repo_row.id)
        .await?
        .is_none()
    {
        store::create_contributor(pool, owner_user.id, repo_row.id, "owner", 0).await?;
    }

    let pr_row = match store::get_pull_request(pool, repo_row.id, scope.number as i64).await? {
        Some(pr) => pr,
        None => {
            store::create_pull_request(pool, repo_row.id, scope.number as i64, owner_user.id)
                .await?
        }
    };

    if !outcome.cached && !outcome.degraded {
        for (category, finding) in outcome.result.findings_with_category() {
            let existing =
                store::get_open_issue_by_fingerprint(pool, pr_row.id, &finding.identity).await?;
            if existing.is_none() {
                store::create_issue(
                    pool,
                    pr_row.id,
                    category.as_str(),
                    &finding.description,
                    &finding.file,
                    0,
                    finding.severity.points(),
                    &finding.identity,
                )
                .await?;
            }
        }
    }

    let score = store::open_issue_points(pool, pr_row.id).await?;
    store::update_pull_request_score(pool, pr_row.id, score).await?;

    Ok(score)
}

// ============ POST /resolve ============

#[derive(Serialize)]
struct ResolveResponse {
    identity: String,
    resolved: bool,
}

async fn handle_resolve(
    State(state): State<AppState>,
    Path((owner, repo, number, identity)): Path<(String, String, u64, String)>,
) -> Result<Json<ResolveResponse>, AppError> {
    if identity.is_empty() {
        return Err(bad_request("identity must not be empty"));
    }

    let scope = ScopeKey::new(owner, repo, number);
    let resolved = state.review.resolve_finding(&scope, &identity);

    // Keep the durable issue record in step with the in-memory history
    // when the rows exist; their absence is not an error.
    if let Some(user) = store::get_user_by_username(&state.pool, &scope.owner)
        .await
        .map_err(|e| internal(e.to_string()))?
    {
        if let Some(repo_row) = store::get_repository_by_name(&state.pool, user.id, &scope.repo)
            .await
            .map_err(|e| internal(e.to_string()))?
        {
            if let Some(pr_row) =
                store::get_pull_request(&state.pool, repo_row.id, scope.number as i64)
                    .await
                    .map_err(|e| internal(e.to_string()))?
            {
                store::resolve_issue_by_fingerprint(&state.pool, pr_row.id, &identity)
                    .await
                    .map_err(|e| internal(e.to_string()))?;
                let score = store::open_issue_points(&state.pool, pr_row.id)
                    .await
                    .map_err(|e| internal(e.to_string()))?;
                store::update_pull_request_score(&state.pool, pr_row.id, score)
                    .await
                    .map_err(|e| internal(e.to_string()))?;
            }
        }
    }

    info!(scope = %scope, identity = %identity, resolved, "resolve requested");
    Ok(Json(ResolveResponse { identity, resolved }))
}
