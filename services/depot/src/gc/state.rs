use chrono::{DateTime, TimeDelta, Utc};

use crate::db::BlobRow;

/// Where a blob is in its garbage collection lifecycle.
///
/// ```text
///              no mounts                    grace period elapsed, no mounts
/// Referenced ------------> PendingDeletion --------------------------------> Deleted
///     ^                          |
///     +--------------------------+
///          mounted again
/// ```
///
/// The sweep applies the `Referenced -> PendingDeletion` and
/// `PendingDeletion -> Referenced` transitions in bulk with one statement
/// each; [`BlobState::next`] is the per-blob definition both of them and the
/// final deletion follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobState {
    /// Not marked. Unmounted blobs stay here until the next mark step.
    Referenced,

    /// Seen without mounts at `since`; deleted once the grace period has
    /// passed unless it is mounted again first.
    PendingDeletion {
        /// When the blob was first seen without mounts.
        since: DateTime<Utc>,
    },

    /// Removed from the database and the backend.
    Deleted,
}

impl BlobState {
    /// The stored state of a blob row; a missing row is [`BlobState::Deleted`].
    pub fn of(blob: Option<&BlobRow>) -> Self {
        match blob {
            None => BlobState::Deleted,
            Some(blob) => match blob.marked_for_deletion_at() {
                Some(since) => BlobState::PendingDeletion { since },
                None => BlobState::Referenced,
            },
        }
    }

    /// Whether more than the grace period has passed since the mark at `now`.
    pub fn is_sweepable(&self, now: DateTime<Utc>, grace_period: TimeDelta) -> bool {
        match self {
            BlobState::PendingDeletion { since } => since
                .checked_add_signed(grace_period)
                .is_some_and(|deadline| deadline < now),
            BlobState::Referenced | BlobState::Deleted => false,
        }
    }

    /// The state after one sweep step, given the current number of mounts.
    pub fn next(self, mounts: i64, now: DateTime<Utc>, grace_period: TimeDelta) -> Self {
        match self {
            BlobState::Referenced if mounts == 0 => BlobState::PendingDeletion { since: now },
            BlobState::PendingDeletion { .. } if mounts > 0 => BlobState::Referenced,
            pending @ BlobState::PendingDeletion { .. } if pending.is_sweepable(now, grace_period) => {
                BlobState::Deleted
            }
            unchanged => unchanged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::from_unix;

    fn blob(marked: Option<i64>) -> BlobRow {
        BlobRow {
            id: 1,
            account_name: "acme".into(),
            digest: "sha256:00".into(),
            size_bytes: 0,
            storage_id: "blobs/sha256/00".into(),
            pushed_at: 0,
            validated_at: 0,
            marked_for_deletion_at: marked,
        }
    }

    #[test]
    fn state_of_rows() {
        assert_eq!(BlobState::of(None), BlobState::Deleted);
        assert_eq!(BlobState::of(Some(&blob(None))), BlobState::Referenced);
        assert_eq!(
            BlobState::of(Some(&blob(Some(100)))),
            BlobState::PendingDeletion {
                since: from_unix(100)
            }
        );
    }

    #[test]
    fn lifecycle() {
        let grace = TimeDelta::hours(4);
        let t0 = from_unix(1_700_000_000);

        let referenced = BlobState::Referenced;
        assert_eq!(referenced.next(2, t0, grace), BlobState::Referenced);

        let pending = referenced.next(0, t0, grace);
        assert_eq!(pending, BlobState::PendingDeletion { since: t0 });

        let early = t0 + TimeDelta::hours(1);
        assert_eq!(pending.next(0, early, grace), pending);
        assert!(!pending.is_sweepable(early, grace));

        assert!(!pending.is_sweepable(t0 + grace, grace));

        let late = t0 + grace + TimeDelta::seconds(1);
        assert!(pending.is_sweepable(late, grace));
        assert_eq!(pending.next(0, late, grace), BlobState::Deleted);
    }

    #[test]
    fn remounting_wins_over_a_pending_deletion() {
        let grace = TimeDelta::hours(4);
        let t0 = from_unix(1_700_000_000);
        let pending = BlobState::PendingDeletion { since: t0 };

        assert_eq!(
            pending.next(1, t0 + TimeDelta::days(7), grace),
            BlobState::Referenced
        );
    }

    #[test]
    fn huge_grace_period_never_expires() {
        let pending = BlobState::PendingDeletion {
            since: from_unix(1_700_000_000),
        };
        assert!(!pending.is_sweepable(from_unix(1_800_000_000), TimeDelta::MAX));
    }
}
