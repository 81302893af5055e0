//! Relational store: accounts, repositories, blobs, mounts, manifests and tags.
//!
//! Row functions take a `&mut SqliteConnection` so the same code runs against
//! a pooled connection or inside a transaction.

use std::str::FromStr;
use std::time::Duration;

use camino::Utf8Path;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

use crate::error::DepotResult;

pub mod accounts;
pub mod blobs;
pub mod manifests;
pub mod models;
pub mod repos;

pub use models::{AccountRow, BlobRow, ManifestRow, RepoRow, TagRow};

/// Handle to the SQLite database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the database at `path` and apply the schema.
    #[tracing::instrument(level = "debug")]
    pub async fn open(path: &Utf8Path, max_connections: u32) -> DepotResult<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{path}"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Avoid transient "database is locked" failures between the janitor and the API.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Create all tables which do not exist yet.
    pub async fn migrate(&self) -> DepotResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> DepotResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    name TEXT PRIMARY KEY NOT NULL,
    blobs_sweeped_at INTEGER,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS repos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_name TEXT NOT NULL REFERENCES accounts(name) ON DELETE CASCADE,
    name TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE (account_name, name)
);

CREATE TABLE IF NOT EXISTS blobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_name TEXT NOT NULL REFERENCES accounts(name) ON DELETE CASCADE,
    digest TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    storage_id TEXT NOT NULL,
    pushed_at INTEGER NOT NULL,
    validated_at INTEGER NOT NULL,
    marked_for_deletion_at INTEGER,
    UNIQUE (account_name, digest)
);

CREATE INDEX IF NOT EXISTS idx_blobs_marked
    ON blobs(account_name, marked_for_deletion_at);

CREATE TABLE IF NOT EXISTS blob_mounts (
    blob_id INTEGER NOT NULL REFERENCES blobs(id) ON DELETE CASCADE,
    repo_id INTEGER NOT NULL REFERENCES repos(id) ON DELETE CASCADE,
    PRIMARY KEY (blob_id, repo_id)
);

CREATE INDEX IF NOT EXISTS idx_blob_mounts_repo ON blob_mounts(repo_id);

CREATE TABLE IF NOT EXISTS manifests (
    repo_id INTEGER NOT NULL REFERENCES repos(id) ON DELETE CASCADE,
    digest TEXT NOT NULL,
    media_type TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    pushed_at INTEGER NOT NULL,
    validated_at INTEGER NOT NULL,
    PRIMARY KEY (repo_id, digest)
);

CREATE TABLE IF NOT EXISTS tags (
    repo_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    digest TEXT NOT NULL,
    pushed_at INTEGER NOT NULL,
    PRIMARY KEY (repo_id, name),
    FOREIGN KEY (repo_id, digest) REFERENCES manifests(repo_id, digest) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_tags_digest ON tags(repo_id, digest);

CREATE TABLE IF NOT EXISTS manifest_blob_refs (
    repo_id INTEGER NOT NULL,
    digest TEXT NOT NULL,
    blob_id INTEGER NOT NULL REFERENCES blobs(id) ON DELETE RESTRICT,
    PRIMARY KEY (repo_id, digest, blob_id),
    FOREIGN KEY (repo_id, digest) REFERENCES manifests(repo_id, digest) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_manifest_blob_refs_blob
    ON manifest_blob_refs(repo_id, blob_id);
"#;

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A freshly migrated database in a temporary directory.
    pub(crate) async fn database() -> (tempfile::TempDir, Database) {
        database_with_pool(1).await
    }

    pub(crate) async fn database_with_pool(size: u32) -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("depot.db")).unwrap();
        let db = Database::open(&path, size).await.unwrap();
        (dir, db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_schema_and_is_reentrant() {
        let (_dir, db) = testing::database().await;
        db.migrate().await.unwrap();
        db.health_check().await.unwrap();

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(db.pool())
                .await
                .unwrap();
        let tables: Vec<&str> = tables.iter().map(|(name,)| name.as_str()).collect();
        for expected in [
            "accounts",
            "blob_mounts",
            "blobs",
            "manifest_blob_refs",
            "manifests",
            "repos",
            "tags",
        ] {
            assert!(tables.contains(&expected), "missing table {expected}");
        }
    }
}
