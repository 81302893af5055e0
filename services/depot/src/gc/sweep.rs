use chrono::{DateTime, Utc};
use sqlx::FromRow;
use storage::{ObjectKey, StorageError, StorageErrorKind};
use tokio_util::sync::CancellationToken;

use super::state::BlobState;
use crate::clock::to_unix;
use crate::db::BlobRow;
use crate::deletion::{Settled, TxGuard, settle};
use crate::depot::Depot;
use crate::error::{DepotError, DepotResult};

/// What one sweep pass over an account did.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// The account which was swept.
    pub account: String,
    /// Marked blobs which had been mounted again.
    pub unmarked: u64,
    /// Blobs newly marked for deletion.
    pub marked: u64,
    /// Blobs removed from the database and the backend.
    pub swept: u64,
    /// Candidates which were mounted again between selection and deletion.
    pub skipped: u64,
    /// Blobs whose backend delete failed. Their rows and marks are intact.
    pub failures: Vec<SweepFailure>,
}

/// A blob which could not be deleted from the backend.
#[derive(Debug)]
pub struct SweepFailure {
    /// Digest of the blob.
    pub digest: String,
    /// The backend error.
    pub error: StorageError,
}

#[derive(Debug, FromRow)]
struct Candidate {
    #[sqlx(flatten)]
    blob: BlobRow,
    mounts: i64,
}

/// Clear the mark of every marked blob which has a mount again.
async fn unmark(depot: &Depot, account: &str) -> DepotResult<u64> {
    let result = sqlx::query(
        "UPDATE blobs SET marked_for_deletion_at = NULL
         WHERE account_name = ?
           AND marked_for_deletion_at IS NOT NULL
           AND EXISTS (SELECT 1 FROM blob_mounts m WHERE m.blob_id = blobs.id)",
    )
    .bind(account)
    .execute(depot.db().pool())
    .await?;
    Ok(result.rows_affected())
}

/// Mark every unmarked blob without mounts. Existing marks keep their time.
async fn mark(depot: &Depot, account: &str, now: DateTime<Utc>) -> DepotResult<u64> {
    let result = sqlx::query(
        "UPDATE blobs SET marked_for_deletion_at = ?
         WHERE account_name = ?
           AND marked_for_deletion_at IS NULL
           AND NOT EXISTS (SELECT 1 FROM blob_mounts m WHERE m.blob_id = blobs.id)",
    )
    .bind(to_unix(now))
    .bind(account)
    .execute(depot.db().pool())
    .await?;
    Ok(result.rows_affected())
}

async fn candidates(
    depot: &Depot,
    account: &str,
    cutoff: DateTime<Utc>,
) -> DepotResult<Vec<Candidate>> {
    // Marks are whole seconds, so a mark strictly before the cutoff is the
    // only one known to be older than the grace period.
    let candidates = sqlx::query_as::<_, Candidate>(
        "SELECT b.*, (SELECT COUNT(*) FROM blob_mounts m WHERE m.blob_id = b.id) AS mounts
         FROM blobs b
         WHERE b.account_name = ?
           AND b.marked_for_deletion_at IS NOT NULL
           AND b.marked_for_deletion_at < ?
         ORDER BY b.id",
    )
    .bind(account)
    .bind(to_unix(cutoff))
    .fetch_all(depot.db().pool())
    .await?;
    Ok(candidates)
}

/// Run unmark, mark and sweep over one account.
///
/// Each step commits on its own. In the sweep step every blob gets its own
/// transaction: the row is deleted only if it is still marked, still past the
/// grace period and still unmounted at that moment, and the deletion is only
/// committed once the backend object is gone. A failed backend delete is
/// recorded in the report and does not stop the pass.
///
/// Cancellation stops the pass with an error; blobs already swept stay swept.
#[tracing::instrument(skip(depot, cancel))]
pub async fn sweep_account(
    depot: &Depot,
    account: &str,
    cancel: &CancellationToken,
) -> DepotResult<SweepReport> {
    let now = depot.now();
    let grace_period = depot.gc().grace_period();
    let cutoff = now
        .checked_sub_signed(grace_period)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    let mut report = SweepReport {
        account: account.to_string(),
        ..Default::default()
    };

    report.unmarked = unmark(depot, account).await?;
    report.marked = mark(depot, account, now).await?;

    for candidate in candidates(depot, account, cutoff).await? {
        if cancel.is_cancelled() {
            return Err(StorageError::cancelled(depot.storage().name()).into());
        }

        let state = BlobState::of(Some(&candidate.blob)).next(candidate.mounts, now, grace_period);
        if state != BlobState::Deleted {
            report.skipped += 1;
            continue;
        }

        let blob = candidate.blob;
        let mut guard = TxGuard::begin(depot.db(), "sweep blob").await?;
        let deleted = sqlx::query(
            "DELETE FROM blobs
             WHERE id = ?
               AND marked_for_deletion_at IS NOT NULL
               AND marked_for_deletion_at < ?
               AND NOT EXISTS (SELECT 1 FROM blob_mounts m WHERE m.blob_id = blobs.id)
               AND NOT EXISTS (SELECT 1 FROM manifest_blob_refs r WHERE r.blob_id = blobs.id)",
        )
        .bind(blob.id)
        .bind(to_unix(cutoff))
        .execute(guard.conn())
        .await?
        .rows_affected();

        if deleted == 0 {
            guard.rollback().await?;
            tracing::debug!(digest = %blob.digest, "blob was mounted again, keeping it");
            report.skipped += 1;
            continue;
        }

        let remote = depot
            .storage()
            .delete(account, &ObjectKey::blob(&blob.digest), cancel)
            .await;

        match settle(guard, remote).await? {
            Settled::Committed => {
                tracing::debug!(digest = %blob.digest, size = blob.size_bytes, "swept blob");
                report.swept += 1;
            }
            Settled::RemoteFailed(error) if error.kind() == StorageErrorKind::Cancelled => {
                return Err(DepotError::Backend(error));
            }
            Settled::RemoteFailed(error) => {
                if error.is_retryable() {
                    tracing::warn!(digest = %blob.digest, %error, "could not delete blob from backend");
                } else {
                    tracing::error!(digest = %blob.digest, %error, "backend refused to delete blob");
                }
                report.failures.push(SweepFailure {
                    digest: blob.digest,
                    error,
                });
            }
        }
    }

    Ok(report)
}
