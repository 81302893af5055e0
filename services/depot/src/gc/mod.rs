//! Blob garbage collection.
//!
//! A blob becomes garbage when no repository mounts it anymore. It is not
//! deleted right away: the sweep first marks it, and only deletes it on a
//! later pass once the grace period has elapsed without a new mount. A mount
//! created at any point before the staged delete commits keeps the blob.

mod scheduler;
mod state;
mod sweep;

pub(crate) use scheduler::{next_due_account, sweep_due_account};
pub use scheduler::sweep_blobs_in_next_account;
pub use state::BlobState;
pub use sweep::{SweepFailure, SweepReport, sweep_account};
