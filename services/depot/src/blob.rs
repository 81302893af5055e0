//! Blob push, pull and mount

use std::collections::HashMap;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderName, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use bytes::Bytes;
use storage::ObjectKey;
use tokio_util::sync::CancellationToken;

use crate::db::{BlobRow, blobs, repos};
use crate::deletion::{Settled, TxGuard, settle};
use crate::depot::Depot;
use crate::error::{DepotError, DepotResult, Resource};
use crate::names::{validate_digest, validate_name, verify_digest};

const DOCKER_CONTENT_DIGEST: HeaderName = HeaderName::from_static("docker-content-digest");

/// Router for blob operations
pub fn router() -> Router<Depot> {
    Router::new()
        .route(
            "/v2/{account}/{repo}/blobs/{digest}",
            get(get_blob).head(head_blob).delete(unmount_blob),
        )
        .route("/v2/{account}/{repo}/blobs/uploads/", post(start_blob_upload))
        .route(
            "/v2/{account}/{repo}/blobs/uploads/{uuid}",
            put(complete_blob_upload).delete(cancel_blob_upload),
        )
}

impl Depot {
    /// Store a blob and mount it into `repo`.
    ///
    /// The rows are staged first and only committed once the backend holds
    /// the bytes, so a blob row never points at a missing object and a
    /// concurrent sweep cannot delete the object underneath the new mount.
    #[tracing::instrument(skip(self, data, cancel), fields(size = data.len()))]
    pub async fn push_blob(
        &self,
        account: &str,
        repo: &str,
        digest: &str,
        data: Bytes,
        cancel: &CancellationToken,
    ) -> DepotResult<BlobRow> {
        validate_name(repo)?;
        verify_digest(digest, &data)?;
        self.require_account(account).await?;

        let now = self.now();
        let key = ObjectKey::blob(digest);
        let storage_id = key.path();

        let mut guard = TxGuard::begin(self.db(), "push blob").await?;
        let repo = repos::find_or_create_repo(guard.conn(), account, repo, now).await?;
        let blob = blobs::upsert_blob(
            guard.conn(),
            blobs::NewBlob {
                account,
                digest,
                size_bytes: data.len() as i64,
                storage_id: storage_id.as_str(),
            },
            now,
        )
        .await?;
        blobs::mount_blob(guard.conn(), blob.id, repo.id).await?;

        let remote = self.storage().put(account, &key, data, cancel).await;
        match settle(guard, remote).await? {
            Settled::Committed => {
                tracing::debug!("stored blob");
                Ok(blob)
            }
            Settled::RemoteFailed(error) => Err(DepotError::Backend(error)),
        }
    }

    /// Mount a blob which already exists in repository `from` into `repo`.
    ///
    /// Returns `None` if `from` does not have the blob, in which case the
    /// client falls back to a regular upload.
    #[tracing::instrument(skip(self))]
    pub async fn mount_blob_from(
        &self,
        account: &str,
        repo: &str,
        from: &str,
        digest: &str,
    ) -> DepotResult<Option<BlobRow>> {
        validate_name(repo)?;
        validate_name(from)?;
        validate_digest(digest)?;
        self.require_account(account).await?;

        let now = self.now();
        let mut guard = TxGuard::begin(self.db(), "mount blob").await?;
        let Some(source) = repos::find_repo(guard.conn(), account, from).await? else {
            guard.rollback().await?;
            return Ok(None);
        };
        let Some(blob) = blobs::find_mounted_blob(guard.conn(), source.id, digest).await? else {
            guard.rollback().await?;
            return Ok(None);
        };

        let target = repos::find_or_create_repo(guard.conn(), account, repo, now).await?;
        blobs::mount_blob(guard.conn(), blob.id, target.id).await?;
        guard.commit().await?;

        tracing::debug!("mounted blob");
        Ok(Some(blob))
    }

    /// Look up a blob mounted into `repo`.
    pub async fn stat_blob(&self, account: &str, repo: &str, digest: &str) -> DepotResult<BlobRow> {
        validate_name(account)?;
        validate_name(repo)?;
        validate_digest(digest)?;

        let mut conn = self.db().pool().acquire().await?;
        let repo = repos::find_repo(&mut conn, account, repo)
            .await?
            .ok_or_else(|| DepotError::not_found(Resource::Repository, repo))?;
        blobs::find_mounted_blob(&mut conn, repo.id, digest)
            .await?
            .ok_or_else(|| DepotError::not_found(Resource::Blob, digest))
    }

    /// Read a blob mounted into `repo`.
    pub async fn get_blob(
        &self,
        account: &str,
        repo: &str,
        digest: &str,
        cancel: &CancellationToken,
    ) -> DepotResult<Bytes> {
        self.stat_blob(account, repo, digest).await?;
        self.storage()
            .get(account, &ObjectKey::blob(digest), cancel)
            .await
            .map_err(|error| {
                if error.is_not_found() {
                    DepotError::not_found(Resource::Blob, digest)
                } else {
                    error.into()
                }
            })
    }

    /// Remove a blob from a repository. The blob itself is left to the sweep.
    #[tracing::instrument(skip(self))]
    pub async fn unmount_blob(&self, account: &str, repo: &str, digest: &str) -> DepotResult<()> {
        validate_name(account)?;
        validate_name(repo)?;
        validate_digest(digest)?;

        let mut conn = self.db().pool().acquire().await?;
        let repo = repos::find_repo(&mut conn, account, repo)
            .await?
            .ok_or_else(|| DepotError::not_found(Resource::Repository, repo))?;
        let blob = blobs::find_mounted_blob(&mut conn, repo.id, digest)
            .await?
            .ok_or_else(|| DepotError::not_found(Resource::Blob, digest))?;

        if !blobs::unmount_blob(&mut conn, blob.id, repo.id).await? {
            return Err(DepotError::BadRequest(format!(
                "blob {digest} is referenced by a manifest"
            )));
        }
        tracing::debug!("unmounted blob");
        Ok(())
    }
}

/// Get a blob
async fn get_blob(
    State(depot): State<Depot>,
    Path((account, repo, digest)): Path<(String, String, String)>,
) -> DepotResult<Response> {
    let data = depot
        .get_blob(&account, &repo, &digest, &depot.cancellation())
        .await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (DOCKER_CONTENT_DIGEST, digest),
        ],
        data,
    )
        .into_response())
}

/// Check if a blob exists
async fn head_blob(
    State(depot): State<Depot>,
    Path((account, repo, digest)): Path<(String, String, String)>,
) -> DepotResult<Response> {
    let blob = depot.stat_blob(&account, &repo, &digest).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, blob.size_bytes.to_string()),
            (DOCKER_CONTENT_DIGEST, blob.digest),
        ],
    )
        .into_response())
}

/// Remove a blob from a repository
async fn unmount_blob(
    State(depot): State<Depot>,
    Path((account, repo, digest)): Path<(String, String, String)>,
) -> DepotResult<StatusCode> {
    depot.unmount_blob(&account, &repo, &digest).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Start a blob upload session, or mount from another repository
async fn start_blob_upload(
    State(depot): State<Depot>,
    Path((account, repo)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> DepotResult<Response> {
    validate_name(&account)?;
    validate_name(&repo)?;

    if let (Some(digest), Some(from)) = (params.get("mount"), params.get("from")) {
        if depot
            .mount_blob_from(&account, &repo, from, digest)
            .await?
            .is_some()
        {
            let location = format!("/v2/{account}/{repo}/blobs/{digest}");
            return Ok((
                StatusCode::CREATED,
                [
                    (header::LOCATION, location),
                    (DOCKER_CONTENT_DIGEST, digest.clone()),
                ],
            )
                .into_response());
        }
    }

    depot.require_account(&account).await?;

    let uuid = uuid::Uuid::new_v4();
    let location = format!("/v2/{account}/{repo}/blobs/uploads/{uuid}");

    Ok((
        StatusCode::ACCEPTED,
        [
            (header::LOCATION, location),
            (header::RANGE, "0-0".to_string()),
        ],
    )
        .into_response())
}

/// Complete a monolithic blob upload
async fn complete_blob_upload(
    State(depot): State<Depot>,
    Path((account, repo, _uuid)): Path<(String, String, String)>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> DepotResult<Response> {
    // Get the digest from query parameter or header
    let digest = params
        .get("digest")
        .map(String::as_str)
        .or_else(|| headers.get("digest").and_then(|v| v.to_str().ok()))
        .ok_or_else(|| DepotError::BadRequest("missing digest".to_string()))?
        .to_string();

    depot
        .push_blob(&account, &repo, &digest, body, &depot.cancellation())
        .await?;

    let location = format!("/v2/{account}/{repo}/blobs/{digest}");

    Ok((
        StatusCode::CREATED,
        [
            (header::LOCATION, location),
            (header::CONTENT_LENGTH, "0".to_string()),
            (DOCKER_CONTENT_DIGEST, digest),
        ],
    )
        .into_response())
}

/// Cancel a blob upload
async fn cancel_blob_upload(
    Path((account, repo, _uuid)): Path<(String, String, String)>,
) -> DepotResult<StatusCode> {
    validate_name(&account)?;
    validate_name(&repo)?;
    Ok(StatusCode::NO_CONTENT)
}
