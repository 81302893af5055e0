//! Deletes which span the database and the blob backend.
//!
//! The database change is staged in a transaction, the backend call runs
//! while the transaction is open, and the outcome of the backend call decides
//! whether the transaction commits. A backend failure therefore leaves the
//! database exactly as it was before the delete started.
//!
//! If the process dies after the backend delete but before the commit, the
//! rows survive and point at a missing object. Retrying the delete repairs
//! this, since backend deletes are idempotent.

use std::fmt;

use sqlx::{Sqlite, SqliteConnection, Transaction};
use storage::{ObjectKey, StorageError};
use tokio_util::sync::CancellationToken;

use crate::db::{Database, RepoRow, manifests, repos};
use crate::depot::Depot;
use crate::error::{DepotError, DepotResult, Resource};
use crate::names::{validate_digest, validate_name, validate_tag};

/// A staged database change which must be explicitly committed or rolled back.
///
/// Dropping the guard without settling it (for example on an early `?`
/// return) rolls the transaction back.
pub struct TxGuard {
    tx: Transaction<'static, Sqlite>,
    armed: Armed,
}

impl fmt::Debug for TxGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxGuard")
            .field("operation", &self.armed.operation)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct Armed {
    operation: &'static str,
    settled: bool,
}

impl Drop for Armed {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!(operation = self.operation, "transaction dropped, rolling back");
        }
    }
}

impl TxGuard {
    /// Open a transaction for `operation`.
    ///
    /// The write lock is taken up front, so a staged change never has to
    /// upgrade a stale read snapshot; concurrent writers wait on the busy timeout.
    pub async fn begin(db: &Database, operation: &'static str) -> sqlx::Result<Self> {
        let tx = db.pool().begin_with("BEGIN IMMEDIATE").await?;
        Ok(Self {
            tx,
            armed: Armed {
                operation,
                settled: false,
            },
        })
    }

    /// The connection the transaction runs on.
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut *self.tx
    }

    /// Make the staged change durable.
    pub async fn commit(mut self) -> sqlx::Result<()> {
        self.armed.settled = true;
        self.tx.commit().await
    }

    /// Discard the staged change.
    pub async fn rollback(mut self) -> sqlx::Result<()> {
        self.armed.settled = true;
        self.tx.rollback().await
    }
}

/// Outcome of [`settle`].
#[derive(Debug)]
pub enum Settled {
    /// The remote step succeeded and the local change was committed.
    Committed,
    /// The remote step failed and the local change was rolled back.
    RemoteFailed(StorageError),
}

/// Commit `guard` if `remote` succeeded, roll it back otherwise.
pub async fn settle(guard: TxGuard, remote: Result<(), StorageError>) -> sqlx::Result<Settled> {
    match remote {
        Ok(()) => {
            guard.commit().await?;
            Ok(Settled::Committed)
        }
        Err(error) => {
            guard.rollback().await?;
            Ok(Settled::RemoteFailed(error))
        }
    }
}

async fn find_repo(guard: &mut TxGuard, account: &str, repo: &str) -> DepotResult<RepoRow> {
    repos::find_repo(guard.conn(), account, repo)
        .await?
        .ok_or_else(|| DepotError::not_found(Resource::Repository, format!("{account}/{repo}")))
}

/// Delete a manifest, its tags and its backend object.
///
/// Mounts which only this manifest was holding are released, so the blobs
/// become candidates for the next sweep. If the backend delete fails, no
/// row is removed.
#[tracing::instrument(skip(depot, cancel))]
pub async fn delete_manifest(
    depot: &Depot,
    account: &str,
    repo: &str,
    digest: &str,
    cancel: &CancellationToken,
) -> DepotResult<()> {
    validate_name(account)?;
    validate_name(repo)?;
    validate_digest(digest)?;

    let mut guard = TxGuard::begin(depot.db(), "delete manifest").await?;
    let repo_row = find_repo(&mut guard, account, repo).await?;

    let released =
        manifests::release_mounts_held_by_manifest(guard.conn(), repo_row.id, digest).await?;
    let deleted = manifests::delete_manifest_row(guard.conn(), repo_row.id, digest).await?;
    if deleted == 0 {
        guard.rollback().await?;
        return Err(DepotError::not_found(Resource::Manifest, digest));
    }

    let key = ObjectKey::manifest(repo, digest);
    let remote = depot.storage().delete(account, &key, cancel).await;

    match settle(guard, remote).await? {
        Settled::Committed => {
            tracing::info!(released_mounts = released, "deleted manifest");
            Ok(())
        }
        Settled::RemoteFailed(error) => {
            tracing::warn!(%error, "backend delete failed, manifest kept");
            Err(DepotError::Backend(error))
        }
    }
}

/// Delete a tag.
///
/// Tags have no backend object of their own, so the remote step only checks
/// that the caller has not given up in the meantime.
#[tracing::instrument(skip(depot, cancel))]
pub async fn delete_tag(
    depot: &Depot,
    account: &str,
    repo: &str,
    tag: &str,
    cancel: &CancellationToken,
) -> DepotResult<()> {
    validate_name(account)?;
    validate_name(repo)?;
    validate_tag(tag)?;

    let mut guard = TxGuard::begin(depot.db(), "delete tag").await?;
    let repo_row = find_repo(&mut guard, account, repo).await?;

    let deleted = manifests::delete_tag_row(guard.conn(), repo_row.id, tag).await?;
    if deleted == 0 {
        guard.rollback().await?;
        return Err(DepotError::not_found(Resource::Tag, tag));
    }

    let remote = if cancel.is_cancelled() {
        Err(StorageError::cancelled(depot.storage().name()))
    } else {
        Ok(())
    };

    match settle(guard, remote).await? {
        Settled::Committed => {
            tracing::info!("deleted tag");
            Ok(())
        }
        Settled::RemoteFailed(error) => Err(DepotError::Backend(error)),
    }
}

#[cfg(test)]
mod tests {
    use storage::{MemoryStorage, StorageErrorKind};

    use super::*;
    use crate::clock::from_unix;
    use crate::db::{accounts, testing};
    use crate::depot::DepotBuilder;

    #[tokio::test]
    async fn settle_commits_on_success_and_rolls_back_on_failure() {
        let (_dir, db) = testing::database().await;
        let now = from_unix(1_700_000_000);

        let mut guard = TxGuard::begin(&db, "test").await.unwrap();
        accounts::create_account(guard.conn(), "kept", now).await.unwrap();
        assert!(matches!(
            settle(guard, Ok(())).await.unwrap(),
            Settled::Committed
        ));

        let mut guard = TxGuard::begin(&db, "test").await.unwrap();
        accounts::create_account(guard.conn(), "lost", now).await.unwrap();
        let outcome = settle(guard, Err(StorageError::cancelled("memory")))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            Settled::RemoteFailed(ref error) if error.kind() == StorageErrorKind::Cancelled
        ));

        let mut conn = db.pool().acquire().await.unwrap();
        assert!(accounts::find_account(&mut conn, "kept").await.unwrap().is_some());
        assert!(accounts::find_account(&mut conn, "lost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reads_are_not_blocked_by_a_staged_change() {
        let (_dir, db) = testing::database_with_pool(4).await;

        let mut guard = TxGuard::begin(&db, "test").await.unwrap();
        accounts::create_account(guard.conn(), "pending", from_unix(0))
            .await
            .unwrap();

        let read = async {
            let mut conn = db.pool().acquire().await.unwrap();
            accounts::find_account(&mut conn, "pending").await.unwrap()
        };
        let seen = tokio::time::timeout(std::time::Duration::from_secs(2), read)
            .await
            .unwrap();
        assert!(seen.is_none());

        guard.commit().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        assert!(accounts::find_account(&mut conn, "pending").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dropped_guard_rolls_back() {
        let (_dir, db) = testing::database().await;
        {
            let mut guard = TxGuard::begin(&db, "test").await.unwrap();
            accounts::create_account(guard.conn(), "ghost", from_unix(0))
                .await
                .unwrap();
        }

        let mut conn = db.pool().acquire().await.unwrap();
        assert!(accounts::find_account(&mut conn, "ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_a_missing_manifest_is_not_found() {
        let (_dir, db) = testing::database().await;
        let depot = DepotBuilder::new(db, MemoryStorage::new().into()).build();
        depot.create_account("acme").await.unwrap();

        let err = delete_manifest(&depot, "acme", "app", "sha256:00", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DepotError::NotFound {
                resource: Resource::Repository,
                ..
            }
        ));
    }
}
