//! Row types mapping to the schema.

#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::clock::from_unix;

/// An account: a namespace owning repositories and blobs.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct AccountRow {
    pub name: String,
    /// When the blob sweep last finished a pass over this account.
    pub blobs_sweeped_at: Option<i64>,
    pub created_at: i64,
}

impl AccountRow {
    /// [`AccountRow::blobs_sweeped_at`] as a timestamp.
    pub fn blobs_sweeped_at(&self) -> Option<DateTime<Utc>> {
        self.blobs_sweeped_at.map(from_unix)
    }
}

/// A repository within an account.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct RepoRow {
    pub id: i64,
    pub account_name: String,
    pub name: String,
    pub created_at: i64,
}

/// A content-addressed blob owned by an account.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct BlobRow {
    pub id: i64,
    pub account_name: String,
    pub digest: String,
    pub size_bytes: i64,
    /// Opaque location token in the blob backend.
    pub storage_id: String,
    pub pushed_at: i64,
    pub validated_at: i64,
    /// Set when the sweep first saw the blob without any mount.
    pub marked_for_deletion_at: Option<i64>,
}

impl BlobRow {
    /// [`BlobRow::marked_for_deletion_at`] as a timestamp.
    pub fn marked_for_deletion_at(&self) -> Option<DateTime<Utc>> {
        self.marked_for_deletion_at.map(from_unix)
    }
}

/// A manifest stored in a repository.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ManifestRow {
    pub repo_id: i64,
    pub digest: String,
    pub media_type: String,
    pub size_bytes: i64,
    pub pushed_at: i64,
    pub validated_at: i64,
}

/// A tag pointing at a manifest in the same repository.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct TagRow {
    pub repo_id: i64,
    pub name: String,
    pub digest: String,
    pub pushed_at: i64,
}
