//! Background task which keeps the blob sweep going.

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::depot::Depot;
use crate::error::DepotResult;
use crate::gc::{next_due_account, sweep_due_account};

/// Sweep every account which is due, one after another.
///
/// Returns the number of accounts swept. A failed pass is logged and the
/// account is passed over for the rest of the call; it stays due. Errors
/// finding the next account, and cancellation, end the call.
pub async fn run_once(depot: &Depot, cancel: &CancellationToken) -> DepotResult<usize> {
    let mut swept = 0;
    let mut failed: Vec<String> = Vec::new();
    while !cancel.is_cancelled() {
        let Some(account) = next_due_account(depot, &failed).await? else {
            break;
        };
        match sweep_due_account(depot, &account, cancel).await {
            Ok(_) => swept += 1,
            Err(error) if cancel.is_cancelled() => return Err(error),
            Err(error) => {
                tracing::error!(account = %account.name, %error, "blob sweep failed");
                failed.push(account.name);
            }
        }
    }
    Ok(swept)
}

/// Poll for due accounts until `cancel` fires.
///
/// There must be only one janitor per database.
#[tracing::instrument(skip_all)]
pub async fn run(depot: Depot, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(depot.gc().poll_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        poll_interval = ?depot.gc().poll_interval(),
        "janitor started"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        match run_once(&depot, &cancel).await {
            Ok(0) => {}
            Ok(swept) => tracing::debug!(accounts = swept, "janitor pass finished"),
            Err(error) => tracing::error!(%error, "blob sweep failed"),
        }
    }

    tracing::info!("janitor stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use storage::MemoryStorage;

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::GcConfig;
    use crate::db::testing;
    use crate::depot::DepotBuilder;

    #[tokio::test]
    async fn run_once_sweeps_each_due_account_once() {
        let (_dir, db) = testing::database().await;
        let depot = DepotBuilder::new(db, MemoryStorage::new().into())
            .clock(ManualClock::default())
            .build();
        for account in ["a", "b", "c"] {
            depot.create_account(account).await.unwrap();
        }

        let cancel = CancellationToken::new();
        assert_eq!(run_once(&depot, &cancel).await.unwrap(), 3);
        assert_eq!(run_once(&depot, &cancel).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn run_stops_when_cancelled() {
        let (_dir, db) = testing::database().await;
        let depot = DepotBuilder::new(db, MemoryStorage::new().into())
            .gc(GcConfig {
                poll_interval_secs: 1,
                ..GcConfig::default()
            })
            .build();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(depot, cancel.clone()));
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
