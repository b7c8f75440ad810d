//! Relational persistence for users, repositories, contributors, pull
//! requests, and surfaced issues.
//!
//! This layer is plain CRUD over SQLite. The analysis cache and history
//! tracker deliberately do not live here; they are process-lifetime
//! in-memory state owned by the review coordinator.

use anyhow::Result;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub github_username: String,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Repository {
    pub id: i64,
    pub owner_id: i64,
    pub github_id: i64,
    pub name: String,
    pub url_path: String,
}

#[derive(Debug, Clone)]
pub struct Contributor {
    pub id: i64,
    pub user_id: i64,
    pub repo_id: i64,
    pub role: String,
    pub points: i64,
}

#[derive(Debug, Clone)]
pub struct PullRequestRecord {
    pub id: i64,
    pub repo_id: i64,
    pub number: i64,
    pub author_id: i64,
    pub score: i64,
}

#[derive(Debug, Clone)]
pub struct IssueRecord {
    pub id: i64,
    pub pr_id: i64,
    pub issue_type: String,
    pub message: String,
    pub file: String,
    pub line: i64,
    pub points: i64,
    pub fingerprint: String,
    pub resolved: bool,
}

fn user_from_row(row: &sqlx::sqlite::SqliteRow) -> User {
    User {
        id: row.get("id"),
        github_username: row.get("github_username"),
        access_token: row.get("access_token"),
    }
}

fn repository_from_row(row: &sqlx::sqlite::SqliteRow) -> Repository {
    Repository {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        github_id: row.get("github_id"),
        name: row.get("name"),
        url_path: row.get("url_path"),
    }
}

fn contributor_from_row(row: &sqlx::sqlite::SqliteRow) -> Contributor {
    Contributor {
        id: row.get("id"),
        user_id: row.get("user_id"),
        repo_id: row.get("repo_id"),
        role: row.get("role"),
        points: row.get("points"),
    }
}

fn pull_request_from_row(row: &sqlx::sqlite::SqliteRow) -> PullRequestRecord {
    PullRequestRecord {
        id: row.get("id"),
        repo_id: row.get("repo_id"),
        number: row.get("number"),
        author_id: row.get("author_id"),
        score: row.get("score"),
    }
}

fn issue_from_row(row: &sqlx::sqlite::SqliteRow) -> IssueRecord {
    IssueRecord {
        id: row.get("id"),
        pr_id: row.get("pr_id"),
        issue_type: row.get("type"),
        message: row.get("message"),
        file: row.get("file"),
        line: row.get("line"),
        points: row.get("points"),
        fingerprint: row.get("fingerprint"),
        resolved: row.get::<i64, _>("resolved") != 0,
    }
}

// ============ User CRUD ============

pub async fn get_user(pool: &SqlitePool, user_id: i64) -> Result<Option<User>> {
    let row = sqlx::query("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(user_from_row))
}

pub async fn get_user_by_username(pool: &SqlitePool, github_username: &str) -> Result<Option<User>> {
    let row = sqlx::query("SELECT * FROM users WHERE github_username = ?")
        .bind(github_username)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(user_from_row))
}

pub async fn create_user(
    pool: &SqlitePool,
    github_username: &str,
    access_token: Option<&str>,
) -> Result<User> {
    let result = sqlx::query("INSERT INTO users (github_username, access_token) VALUES (?, ?)")
        .bind(github_username)
        .bind(access_token)
        .execute(pool)
        .await?;

    Ok(User {
        id: result.last_insert_rowid(),
        github_username: github_username.to_string(),
        access_token: access_token.map(str::to_string),
    })
}

pub async fn update_user_token(
    pool: &SqlitePool,
    user_id: i64,
    access_token: &str,
) -> Result<Option<User>> {
    sqlx::query("UPDATE users SET access_token = ? WHERE id = ?")
        .bind(access_token)
        .bind(user_id)
        .execute(pool)
        .await?;
    get_user(pool, user_id).await
}

/// Fetch or create the user row for a GitHub username, refreshing the
/// stored token either way. Used by the OAuth callback.
pub async fn upsert_user_token(
    pool: &SqlitePool,
    github_username: &str,
    access_token: &str,
) -> Result<User> {
    match get_user_by_username(pool, github_username).await? {
        Some(user) => Ok(update_user_token(pool, user.id, access_token)
            .await?
            .expect("user row disappeared mid-update")),
        None => create_user(pool, github_username, Some(access_token)).await,
    }
}

// ============ Repository CRUD ============

pub async fn get_repository(pool: &SqlitePool, repo_id: i64) -> Result<Option<Repository>> {
    let row = sqlx::query("SELECT * FROM repositories WHERE id = ?")
        .bind(repo_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(repository_from_row))
}

pub async fn get_repository_by_github_id(
    pool: &SqlitePool,
    github_id: i64,
) -> Result<Option<Repository>> {
    let row = sqlx::query("SELECT * FROM repositories WHERE github_id = ?")
        .bind(github_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(repository_from_row))
}

pub async fn get_repository_by_name(
    pool: &SqlitePool,
    owner_id: i64,
    name: &str,
) -> Result<Option<Repository>> {
    let row = sqlx::query("SELECT * FROM repositories WHERE owner_id = ? AND name = ?")
        .bind(owner_id)
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(repository_from_row))
}

pub async fn get_repositories_by_owner(
    pool: &SqlitePool,
    owner_id: i64,
) -> Result<Vec<Repository>> {
    let rows = sqlx::query("SELECT * FROM repositories WHERE owner_id = ? ORDER BY id")
        .bind(owner_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(repository_from_row).collect())
}

pub async fn create_repository(
    pool: &SqlitePool,
    owner_id: i64,
    github_id: i64,
    name: &str,
    url_path: &str,
) -> Result<Repository> {
    let result = sqlx::query(
        "INSERT INTO repositories (owner_id, github_id, name, url_path) VALUES (?, ?, ?, ?)",
    )
    .bind(owner_id)
    .bind(github_id)
    .bind(name)
    .bind(url_path)
    .execute(pool)
    .await?;

    Ok(Repository {
        id: result.last_insert_rowid(),
        owner_id,
        github_id,
        name: name.to_string(),
        url_path: url_path.to_string(),
    })
}

// ============ Contributor CRUD ============

pub async fn get_contributor(
    pool: &SqlitePool,
    user_id: i64,
    repo_id: i64,
) -> Result<Option<Contributor>> {
    let row = sqlx::query("SELECT * FROM contributors WHERE user_id = ? AND repo_id = ?")
        .bind(user_id)
        .bind(repo_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(contributor_from_row))
}

pub async fn get_contributors_by_repo(
    pool: &SqlitePool,
    repo_id: i64,
) -> Result<Vec<Contributor>> {
    let rows = sqlx::query("SELECT * FROM contributors WHERE repo_id = ? ORDER BY points DESC")
        .bind(repo_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(contributor_from_row).collect())
}

pub async fn create_contributor(
    pool: &SqlitePool,
    user_id: i64,
    repo_id: i64,
    role: &str,
    points: i64,
) -> Result<Contributor> {
    let result = sqlx::query(
        "INSERT INTO contributors (user_id, repo_id, role, points) VALUES (?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(repo_id)
    .bind(role)
    .bind(points)
    .execute(pool)
    .await?;

    Ok(Contributor {
        id: result.last_insert_rowid(),
        user_id,
        repo_id,
        role: role.to_string(),
        points,
    })
}

pub async fn update_contributor_points(
    pool: &SqlitePool,
    contributor_id: i64,
    points: i64,
) -> Result<()> {
    sqlx::query("UPDATE contributors SET points = ? WHERE id = ?")
        .bind(points)
        .bind(contributor_id)
        .execute(pool)
        .await?;
    Ok(())
}

// ============ Pull request CRUD ============

pub async fn get_pull_request(
    pool: &SqlitePool,
    repo_id: i64,
    number: i64,
) -> Result<Option<PullRequestRecord>> {
    let row = sqlx::query("SELECT * FROM pull_requests WHERE repo_id = ? AND number = ?")
        .bind(repo_id)
        .bind(number)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(pull_request_from_row))
}

pub async fn get_pull_requests_by_repo(
    pool: &SqlitePool,
    repo_id: i64,
) -> Result<Vec<PullRequestRecord>> {
    let rows = sqlx::query("SELECT * FROM pull_requests WHERE repo_id = ? ORDER BY number")
        .bind(repo_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(pull_request_from_row).collect())
}

pub async fn create_pull_request(
    pool: &SqlitePool,
    repo_id: i64,
    number: i64,
    author_id: i64,
) -> Result<PullRequestRecord> {
    let result = sqlx::query(
        "INSERT INTO pull_requests (repo_id, number, author_id, score) VALUES (?, ?, ?, 0)",
    )
    .bind(repo_id)
    .bind(number)
    .bind(author_id)
    .execute(pool)
    .await?;

    Ok(PullRequestRecord {
        id: result.last_insert_rowid(),
        repo_id,
        number,
        author_id,
        score: 0,
    })
}

pub async fn update_pull_request_score(pool: &SqlitePool, pr_id: i64, score: i64) -> Result<()> {
    sqlx::query("UPDATE pull_requests SET score = ? WHERE id = ?")
        .bind(score)
        .bind(pr_id)
        .execute(pool)
        .await?;
    Ok(())
}

// ============ Issue CRUD ============

pub async fn get_issues_by_pr(pool: &SqlitePool, pr_id: i64) -> Result<Vec<IssueRecord>> {
    let rows = sqlx::query("SELECT * FROM issues WHERE pr_id = ? ORDER BY id")
        .bind(pr_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(issue_from_row).collect())
}

pub async fn get_unresolved_issues_by_pr(
    pool: &SqlitePool,
    pr_id: i64,
) -> Result<Vec<IssueRecord>> {
    let rows = sqlx::query("SELECT * FROM issues WHERE pr_id = ? AND resolved = 0 ORDER BY id")
        .bind(pr_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(issue_from_row).collect())
}

#[allow(clippy::too_many_arguments)]
pub async fn create_issue(
    pool: &SqlitePool,
    pr_id: i64,
    issue_type: &str,
    message: &str,
    file: &str,
    line: i64,
    points: i64,
    fingerprint: &str,
) -> Result<IssueRecord> {
    let result = sqlx::query(
        r#"
        INSERT INTO issues (pr_id, type, message, file, line, points, fingerprint, resolved, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)
        "#,
    )
    .bind(pr_id)
    .bind(issue_type)
    .bind(message)
    .bind(file)
    .bind(line)
    .bind(points)
    .bind(fingerprint)
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await?;

    Ok(IssueRecord {
        id: result.last_insert_rowid(),
        pr_id,
        issue_type: issue_type.to_string(),
        message: message.to_string(),
        file: file.to_string(),
        line,
        points,
        fingerprint: fingerprint.to_string(),
        resolved: false,
    })
}

/// Look up an unresolved issue by its finding fingerprint, used to avoid
/// duplicating rows when the same finding recurs across analyses.
pub async fn get_open_issue_by_fingerprint(
    pool: &SqlitePool,
    pr_id: i64,
    fingerprint: &str,
) -> Result<Option<IssueRecord>> {
    let row = sqlx::query(
        "SELECT * FROM issues WHERE pr_id = ? AND fingerprint = ? AND resolved = 0",
    )
    .bind(pr_id)
    .bind(fingerprint)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(issue_from_row))
}

pub async fn resolve_issue(pool: &SqlitePool, issue_id: i64) -> Result<bool> {
    let result = sqlx::query("UPDATE issues SET resolved = 1 WHERE id = ? AND resolved = 0")
        .bind(issue_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn resolve_issue_by_fingerprint(
    pool: &SqlitePool,
    pr_id: i64,
    fingerprint: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE issues SET resolved = 1 WHERE pr_id = ? AND fingerprint = ? AND resolved = 0",
    )
    .bind(pr_id)
    .bind(fingerprint)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Sum of points across a pull request's unresolved issues, used as the
/// PR's running score.
pub async fn open_issue_points(pool: &SqlitePool, pr_id: i64) -> Result<i64> {
    let total: Option<i64> =
        sqlx::query_scalar("SELECT SUM(points) FROM issues WHERE pr_id = ? AND resolved = 0")
            .bind(pr_id)
            .fetch_one(pool)
            .await?;
    Ok(total.unwrap_or(0))
}
