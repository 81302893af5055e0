use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::sweep::{SweepReport, sweep_account};
use crate::db::{AccountRow, accounts};
use crate::depot::Depot;
use crate::error::{DepotError, DepotResult};

/// Sweep the blobs of the account which has waited longest for it.
///
/// Only accounts not swept within the sweep interval are eligible. Returns
/// [`DepotError::NotDue`] when there is none, which is the normal idle state.
/// After a completed pass the account's `blobs_sweeped_at` is set, also when
/// nothing was deleted; a pass which fails leaves it untouched so the account
/// is retried next.
#[tracing::instrument(skip_all)]
pub async fn sweep_blobs_in_next_account(
    depot: &Depot,
    cancel: &CancellationToken,
) -> DepotResult<SweepReport> {
    let Some(account) = next_due_account(depot, &[]).await? else {
        return Err(DepotError::NotDue);
    };
    sweep_due_account(depot, &account, cancel).await
}

/// The account due for a sweep which has waited longest, passing over `skip`.
pub(crate) async fn next_due_account(
    depot: &Depot,
    skip: &[String],
) -> DepotResult<Option<AccountRow>> {
    let cutoff = depot
        .now()
        .checked_sub_signed(depot.gc().sweep_interval())
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    let mut conn = depot.db().pool().acquire().await?;
    let account = accounts::next_account_due_for_blob_sweep(&mut conn, cutoff, skip).await?;
    if account.is_none() {
        tracing::trace!("no account due for a blob sweep");
    }
    Ok(account)
}

/// Sweep `account` and record the finished pass.
pub(crate) async fn sweep_due_account(
    depot: &Depot,
    account: &AccountRow,
    cancel: &CancellationToken,
) -> DepotResult<SweepReport> {
    let report = sweep_account(depot, &account.name, cancel).await?;

    let mut conn = depot.db().pool().acquire().await?;
    accounts::set_blobs_sweeped_at(&mut conn, &account.name, depot.now()).await?;

    tracing::info!(
        account = %report.account,
        unmarked = report.unmarked,
        marked = report.marked,
        swept = report.swept,
        failed = report.failures.len(),
        "blob sweep finished"
    );
    Ok(report)
}
