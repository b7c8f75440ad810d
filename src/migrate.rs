use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Create users table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            github_username TEXT NOT NULL UNIQUE,
            access_token TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create repositories table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repositories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id INTEGER NOT NULL,
            github_id INTEGER NOT NULL UNIQUE,
            name TEXT NOT NULL,
            url_path TEXT NOT NULL,
            FOREIGN KEY (owner_id) REFERENCES users(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create contributors table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS contributors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            repo_id INTEGER NOT NULL,
            role TEXT NOT NULL,
            points INTEGER NOT NULL DEFAULT 0,
            UNIQUE(user_id, repo_id),
            FOREIGN KEY (user_id) REFERENCES users(id),
            FOREIGN KEY (repo_id) REFERENCES repositories(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create pull_requests table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pull_requests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            repo_id INTEGER NOT NULL,
            number INTEGER NOT NULL,
            author_id INTEGER NOT NULL,
            score INTEGER NOT NULL DEFAULT 0,
            UNIQUE(repo_id, number),
            FOREIGN KEY (repo_id) REFERENCES repositories(id),
            FOREIGN KEY (author_id) REFERENCES users(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create issues table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS issues (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pr_id INTEGER NOT NULL,
            type TEXT NOT NULL,
            message TEXT NOT NULL,
            file TEXT NOT NULL,
            line INTEGER NOT NULL DEFAULT 0,
            points INTEGER NOT NULL DEFAULT 0,
            fingerprint TEXT NOT NULL DEFAULT '',
            resolved INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (pr_id) REFERENCES pull_requests(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_repositories_owner_id ON repositories(owner_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pull_requests_repo_id ON pull_requests(repo_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_issues_pr_id ON issues(pr_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_issues_fingerprint ON issues(pr_id, fingerprint)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
