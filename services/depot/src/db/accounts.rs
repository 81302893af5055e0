use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::models::AccountRow;
use crate::clock::to_unix;

/// Create an account. Returns `false` if it already existed.
pub async fn create_account(
    conn: &mut SqliteConnection,
    name: &str,
    now: DateTime<Utc>,
) -> sqlx::Result<bool> {
    let result = sqlx::query("INSERT OR IGNORE INTO accounts (name, created_at) VALUES (?, ?)")
        .bind(name)
        .bind(to_unix(now))
        .execute(conn)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Look up an account by name.
pub async fn find_account(
    conn: &mut SqliteConnection,
    name: &str,
) -> sqlx::Result<Option<AccountRow>> {
    sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE name = ?")
        .bind(name)
        .fetch_optional(conn)
        .await
}

/// The account which has waited longest for a blob sweep, if any has waited
/// since `cutoff`. Accounts which were never swept come first; accounts named
/// in `skip` are passed over.
pub async fn next_account_due_for_blob_sweep(
    conn: &mut SqliteConnection,
    cutoff: DateTime<Utc>,
    skip: &[String],
) -> sqlx::Result<Option<AccountRow>> {
    let mut query = QueryBuilder::<Sqlite>::new(
        "SELECT * FROM accounts WHERE (blobs_sweeped_at IS NULL OR blobs_sweeped_at <= ",
    );
    query.push_bind(to_unix(cutoff)).push(")");

    if !skip.is_empty() {
        query.push(" AND name NOT IN (");
        let mut names = query.separated(", ");
        for name in skip {
            names.push_bind(name.as_str());
        }
        names.push_unseparated(")");
    }

    query.push(" ORDER BY blobs_sweeped_at IS NOT NULL, blobs_sweeped_at ASC, name ASC LIMIT 1");
    query
        .build_query_as::<AccountRow>()
        .fetch_optional(conn)
        .await
}

/// Record that a blob sweep of `name` finished at `at`.
pub async fn set_blobs_sweeped_at(
    conn: &mut SqliteConnection,
    name: &str,
    at: DateTime<Utc>,
) -> sqlx::Result<()> {
    sqlx::query("UPDATE accounts SET blobs_sweeped_at = ? WHERE name = ?")
        .bind(to_unix(at))
        .bind(name)
        .execute(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::clock::from_unix;
    use crate::db::testing;

    #[tokio::test]
    async fn create_is_idempotent() {
        let (_dir, db) = testing::database().await;
        let mut conn = db.pool().acquire().await.unwrap();
        let now = from_unix(1_700_000_000);

        assert!(create_account(&mut conn, "acme", now).await.unwrap());
        assert!(!create_account(&mut conn, "acme", now).await.unwrap());

        let account = find_account(&mut conn, "acme").await.unwrap().unwrap();
        assert_eq!(account.blobs_sweeped_at, None);
        assert_eq!(account.created_at, 1_700_000_000);
    }

    #[tokio::test]
    async fn never_swept_accounts_come_first_then_oldest() {
        let (_dir, db) = testing::database().await;
        let mut conn = db.pool().acquire().await.unwrap();
        let now = from_unix(1_700_000_000);

        for name in ["a", "b", "c"] {
            create_account(&mut conn, name, now).await.unwrap();
        }
        set_blobs_sweeped_at(&mut conn, "a", now - TimeDelta::hours(3))
            .await
            .unwrap();
        set_blobs_sweeped_at(&mut conn, "b", now - TimeDelta::hours(5))
            .await
            .unwrap();

        let cutoff = now - TimeDelta::hours(1);
        let next = next_account_due_for_blob_sweep(&mut conn, cutoff, &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.name, "c");

        set_blobs_sweeped_at(&mut conn, "c", now).await.unwrap();
        let next = next_account_due_for_blob_sweep(&mut conn, cutoff, &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.name, "b");
        assert_eq!(next.blobs_sweeped_at(), Some(now - TimeDelta::hours(5)));

        let skip = ["b".to_string()];
        let next = next_account_due_for_blob_sweep(&mut conn, cutoff, &skip)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.name, "a");

        let skip = ["a".to_string(), "b".to_string()];
        let next = next_account_due_for_blob_sweep(&mut conn, cutoff, &skip)
            .await
            .unwrap();
        assert_eq!(next, None);
    }

    #[tokio::test]
    async fn recently_swept_accounts_are_not_due() {
        let (_dir, db) = testing::database().await;
        let mut conn = db.pool().acquire().await.unwrap();
        let now = from_unix(1_700_000_000);

        create_account(&mut conn, "acme", now).await.unwrap();
        set_blobs_sweeped_at(&mut conn, "acme", now).await.unwrap();

        let next = next_account_due_for_blob_sweep(&mut conn, now - TimeDelta::hours(1), &[])
            .await
            .unwrap();
        assert_eq!(next, None);
    }
}
