use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::models::{ManifestRow, TagRow};
use crate::clock::to_unix;
use crate::pagination::{Ordering, PageQuery};

/// Manifest listings are ordered by digest, which is unique per repository.
pub const MANIFESTS_BY_DIGEST: Ordering = Ordering::new(&["digest"]);

/// Tag listings are ordered by name, which is unique per repository.
pub const TAGS_BY_NAME: Ordering = Ordering::new(&["name"]);

/// A manifest about to be recorded.
#[derive(Debug, Clone, Copy)]
pub struct NewManifest<'a> {
    /// Repository the manifest is pushed to.
    pub repo_id: i64,
    /// Digest of the manifest body.
    pub digest: &'a str,
    /// Content type the manifest was pushed with.
    pub media_type: &'a str,
    /// Size of the manifest body.
    pub size_bytes: i64,
}

/// Record a manifest and the blobs it references.
///
/// Pushing the same manifest again refreshes `validated_at`.
pub async fn insert_manifest(
    conn: &mut SqliteConnection,
    manifest: NewManifest<'_>,
    blob_ids: &[i64],
    now: DateTime<Utc>,
) -> sqlx::Result<ManifestRow> {
    let now = to_unix(now);
    let row = sqlx::query_as::<_, ManifestRow>(
        "INSERT INTO manifests (repo_id, digest, media_type, size_bytes, pushed_at, validated_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT (repo_id, digest) DO UPDATE SET validated_at = excluded.validated_at
         RETURNING *",
    )
    .bind(manifest.repo_id)
    .bind(manifest.digest)
    .bind(manifest.media_type)
    .bind(manifest.size_bytes)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    for blob_id in blob_ids {
        sqlx::query(
            "INSERT OR IGNORE INTO manifest_blob_refs (repo_id, digest, blob_id) VALUES (?, ?, ?)",
        )
        .bind(manifest.repo_id)
        .bind(manifest.digest)
        .bind(blob_id)
        .execute(&mut *conn)
        .await?;
    }

    Ok(row)
}

/// Point a tag at a manifest, moving it if it already exists.
pub async fn upsert_tag(
    conn: &mut SqliteConnection,
    repo_id: i64,
    name: &str,
    digest: &str,
    now: DateTime<Utc>,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO tags (repo_id, name, digest, pushed_at) VALUES (?, ?, ?, ?)
         ON CONFLICT (repo_id, name) DO UPDATE
         SET digest = excluded.digest, pushed_at = excluded.pushed_at",
    )
    .bind(repo_id)
    .bind(name)
    .bind(digest)
    .bind(to_unix(now))
    .execute(conn)
    .await?;
    Ok(())
}

/// Look up a manifest by digest.
pub async fn find_manifest(
    conn: &mut SqliteConnection,
    repo_id: i64,
    digest: &str,
) -> sqlx::Result<Option<ManifestRow>> {
    sqlx::query_as::<_, ManifestRow>("SELECT * FROM manifests WHERE repo_id = ? AND digest = ?")
        .bind(repo_id)
        .bind(digest)
        .fetch_optional(conn)
        .await
}

/// Look up a tag by name.
pub async fn find_tag(
    conn: &mut SqliteConnection,
    repo_id: i64,
    name: &str,
) -> sqlx::Result<Option<TagRow>> {
    sqlx::query_as::<_, TagRow>("SELECT * FROM tags WHERE repo_id = ? AND name = ?")
        .bind(repo_id)
        .bind(name)
        .fetch_optional(conn)
        .await
}

/// One page of the manifests in a repository, plus the probe row.
pub async fn list_manifests(
    conn: &mut SqliteConnection,
    repo_id: i64,
    page: &PageQuery,
) -> sqlx::Result<Vec<ManifestRow>> {
    let sql = format!(
        "SELECT * FROM manifests WHERE repo_id = ?{} ORDER BY {} LIMIT ?",
        page.and_where(),
        page.order_by
    );

    let mut query = sqlx::query_as::<_, ManifestRow>(&sql).bind(repo_id);
    for value in &page.binds {
        query = query.bind(value);
    }
    query.bind(page.fetch_limit).fetch_all(conn).await
}

/// One page of the tags in a repository, plus the probe row.
pub async fn list_tags(
    conn: &mut SqliteConnection,
    repo_id: i64,
    page: &PageQuery,
) -> sqlx::Result<Vec<TagRow>> {
    let sql = format!(
        "SELECT * FROM tags WHERE repo_id = ?{} ORDER BY {} LIMIT ?",
        page.and_where(),
        page.order_by
    );

    let mut query = sqlx::query_as::<_, TagRow>(&sql).bind(repo_id);
    for value in &page.binds {
        query = query.bind(value);
    }
    query.bind(page.fetch_limit).fetch_all(conn).await
}

/// All tags pointing at any of `digests`, ordered by name.
pub async fn tags_for_manifests(
    conn: &mut SqliteConnection,
    repo_id: i64,
    digests: &[String],
) -> sqlx::Result<Vec<TagRow>> {
    if digests.is_empty() {
        return Ok(Vec::new());
    }

    let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM tags WHERE repo_id = ");
    query.push_bind(repo_id).push(" AND digest IN (");
    let mut list = query.separated(", ");
    for digest in digests {
        list.push_bind(digest);
    }
    list.push_unseparated(") ORDER BY name ASC");

    query.build_query_as::<TagRow>().fetch_all(conn).await
}

/// Remove the mounts which exist only because of this manifest.
///
/// A blob stays mounted if another manifest in the same repository still
/// references it.
pub async fn release_mounts_held_by_manifest(
    conn: &mut SqliteConnection,
    repo_id: i64,
    digest: &str,
) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "DELETE FROM blob_mounts
         WHERE repo_id = ?
           AND blob_id IN (
               SELECT blob_id FROM manifest_blob_refs WHERE repo_id = ? AND digest = ?
           )
           AND NOT EXISTS (
               SELECT 1 FROM manifest_blob_refs other
               WHERE other.repo_id = blob_mounts.repo_id
                 AND other.blob_id = blob_mounts.blob_id
                 AND other.digest <> ?
           )",
    )
    .bind(repo_id)
    .bind(repo_id)
    .bind(digest)
    .bind(digest)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

/// Delete a manifest row. Its tags and blob references cascade.
pub async fn delete_manifest_row(
    conn: &mut SqliteConnection,
    repo_id: i64,
    digest: &str,
) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM manifests WHERE repo_id = ? AND digest = ?")
        .bind(repo_id)
        .bind(digest)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

/// Delete a tag row.
pub async fn delete_tag_row(
    conn: &mut SqliteConnection,
    repo_id: i64,
    name: &str,
) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM tags WHERE repo_id = ? AND name = ?")
        .bind(repo_id)
        .bind(name)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}
