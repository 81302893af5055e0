use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use super::models::RepoRow;
use crate::clock::to_unix;
use crate::pagination::{Ordering, PageQuery};

/// Repository listings are ordered by name, which is unique per account.
pub const REPOS_BY_NAME: Ordering = Ordering::new(&["name"]);

/// Look up a repository, creating it if it does not exist yet.
pub async fn find_or_create_repo(
    conn: &mut SqliteConnection,
    account: &str,
    name: &str,
    now: DateTime<Utc>,
) -> sqlx::Result<RepoRow> {
    sqlx::query(
        "INSERT INTO repos (account_name, name, created_at) VALUES (?, ?, ?)
         ON CONFLICT (account_name, name) DO NOTHING",
    )
    .bind(account)
    .bind(name)
    .bind(to_unix(now))
    .execute(&mut *conn)
    .await?;

    sqlx::query_as::<_, RepoRow>("SELECT * FROM repos WHERE account_name = ? AND name = ?")
        .bind(account)
        .bind(name)
        .fetch_one(&mut *conn)
        .await
}

/// Look up a repository.
pub async fn find_repo(
    conn: &mut SqliteConnection,
    account: &str,
    name: &str,
) -> sqlx::Result<Option<RepoRow>> {
    sqlx::query_as::<_, RepoRow>("SELECT * FROM repos WHERE account_name = ? AND name = ?")
        .bind(account)
        .bind(name)
        .fetch_optional(conn)
        .await
}

/// One page of the repositories in `account`, plus the probe row.
pub async fn list_repos(
    conn: &mut SqliteConnection,
    account: &str,
    page: &PageQuery,
) -> sqlx::Result<Vec<RepoRow>> {
    let sql = format!(
        "SELECT * FROM repos WHERE account_name = ?{} ORDER BY {} LIMIT ?",
        page.and_where(),
        page.order_by
    );

    let mut query = sqlx::query_as::<_, RepoRow>(&sql).bind(account);
    for value in &page.binds {
        query = query.bind(value);
    }
    query.bind(page.fetch_limit).fetch_all(conn).await
}
