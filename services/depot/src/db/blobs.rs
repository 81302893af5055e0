use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use super::models::BlobRow;
use crate::clock::to_unix;

/// A new blob, as recorded after a successful upload.
#[derive(Debug, Clone, Copy)]
pub struct NewBlob<'a> {
    /// Owning account.
    pub account: &'a str,
    /// Content digest, `<algorithm>:<hex>`.
    pub digest: &'a str,
    /// Size in bytes.
    pub size_bytes: i64,
    /// Location token in the blob backend.
    pub storage_id: &'a str,
}

/// Record a blob. Pushing a blob which already exists refreshes `validated_at`.
pub async fn upsert_blob(
    conn: &mut SqliteConnection,
    blob: NewBlob<'_>,
    now: DateTime<Utc>,
) -> sqlx::Result<BlobRow> {
    let now = to_unix(now);
    sqlx::query_as::<_, BlobRow>(
        "INSERT INTO blobs (account_name, digest, size_bytes, storage_id, pushed_at, validated_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT (account_name, digest) DO UPDATE SET validated_at = excluded.validated_at
         RETURNING *",
    )
    .bind(blob.account)
    .bind(blob.digest)
    .bind(blob.size_bytes)
    .bind(blob.storage_id)
    .bind(now)
    .bind(now)
    .fetch_one(conn)
    .await
}

/// Look up a blob by digest, regardless of where it is mounted.
pub async fn find_blob(
    conn: &mut SqliteConnection,
    account: &str,
    digest: &str,
) -> sqlx::Result<Option<BlobRow>> {
    sqlx::query_as::<_, BlobRow>("SELECT * FROM blobs WHERE account_name = ? AND digest = ?")
        .bind(account)
        .bind(digest)
        .fetch_optional(conn)
        .await
}

/// Look up a blob by digest, only if it is mounted into `repo_id`.
pub async fn find_mounted_blob(
    conn: &mut SqliteConnection,
    repo_id: i64,
    digest: &str,
) -> sqlx::Result<Option<BlobRow>> {
    sqlx::query_as::<_, BlobRow>(
        "SELECT b.* FROM blobs b
         JOIN blob_mounts m ON m.blob_id = b.id
         WHERE m.repo_id = ? AND b.digest = ?",
    )
    .bind(repo_id)
    .bind(digest)
    .fetch_optional(conn)
    .await
}

/// Mount a blob into a repository. Returns `false` if it was already mounted.
pub async fn mount_blob(
    conn: &mut SqliteConnection,
    blob_id: i64,
    repo_id: i64,
) -> sqlx::Result<bool> {
    let result = sqlx::query("INSERT OR IGNORE INTO blob_mounts (blob_id, repo_id) VALUES (?, ?)")
        .bind(blob_id)
        .bind(repo_id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Remove a mount, unless a manifest in the repository still references the blob.
///
/// Returns `false` if nothing was removed.
pub async fn unmount_blob(
    conn: &mut SqliteConnection,
    blob_id: i64,
    repo_id: i64,
) -> sqlx::Result<bool> {
    let result = sqlx::query(
        "DELETE FROM blob_mounts
         WHERE blob_id = ? AND repo_id = ?
           AND NOT EXISTS (
               SELECT 1 FROM manifest_blob_refs r
               WHERE r.repo_id = blob_mounts.repo_id AND r.blob_id = blob_mounts.blob_id
           )",
    )
    .bind(blob_id)
    .bind(repo_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Number of repositories a blob is mounted into.
pub async fn count_mounts(conn: &mut SqliteConnection, blob_id: i64) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM blob_mounts WHERE blob_id = ?")
        .bind(blob_id)
        .fetch_one(conn)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::from_unix;
    use crate::db::{accounts, repos, testing};

    fn new_blob(digest: &str) -> NewBlob<'_> {
        NewBlob {
            account: "acme",
            digest,
            size_bytes: 3,
            storage_id: digest,
        }
    }

    #[tokio::test]
    async fn upsert_refreshes_validated_at() {
        let (_dir, db) = testing::database().await;
        let mut conn = db.pool().acquire().await.unwrap();
        let now = from_unix(1_700_000_000);
        accounts::create_account(&mut conn, "acme", now).await.unwrap();

        let first = upsert_blob(&mut conn, new_blob("sha256:aa"), now).await.unwrap();
        let later = from_unix(1_700_000_600);
        let second = upsert_blob(&mut conn, new_blob("sha256:aa"), later).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.pushed_at, 1_700_000_000);
        assert_eq!(second.validated_at, 1_700_000_600);
        assert_eq!(second.marked_for_deletion_at, None);
    }

    #[tokio::test]
    async fn mounts_scope_blob_visibility() {
        let (_dir, db) = testing::database().await;
        let mut conn = db.pool().acquire().await.unwrap();
        let now = from_unix(1_700_000_000);
        accounts::create_account(&mut conn, "acme", now).await.unwrap();
        let app = repos::find_or_create_repo(&mut conn, "acme", "app", now).await.unwrap();
        let web = repos::find_or_create_repo(&mut conn, "acme", "web", now).await.unwrap();

        let blob = upsert_blob(&mut conn, new_blob("sha256:bb"), now).await.unwrap();
        assert!(mount_blob(&mut conn, blob.id, app.id).await.unwrap());
        assert!(!mount_blob(&mut conn, blob.id, app.id).await.unwrap());

        assert!(find_mounted_blob(&mut conn, app.id, "sha256:bb").await.unwrap().is_some());
        assert!(find_mounted_blob(&mut conn, web.id, "sha256:bb").await.unwrap().is_none());
        assert_eq!(count_mounts(&mut conn, blob.id).await.unwrap(), 1);

        assert!(unmount_blob(&mut conn, blob.id, app.id).await.unwrap());
        assert_eq!(count_mounts(&mut conn, blob.id).await.unwrap(), 0);
        assert!(find_blob(&mut conn, "acme", "sha256:bb").await.unwrap().is_some());
    }
}
