//! Manifest push, pull and delete

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use storage::ObjectKey;
use tokio_util::sync::CancellationToken;

use crate::db::{ManifestRow, blobs, manifests, repos};
use crate::deletion::{self, Settled, TxGuard, settle};
use crate::depot::Depot;
use crate::error::{DepotError, DepotResult, Resource};
use crate::names::{
    is_digest, sha256_digest, validate_digest, validate_name, validate_tag, verify_digest,
};

const DOCKER_CONTENT_DIGEST: HeaderName = HeaderName::from_static("docker-content-digest");

const DEFAULT_MANIFEST_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Router for manifest operations
pub fn router() -> Router<Depot> {
    Router::new().route(
        "/v2/{account}/{repo}/manifests/{reference}",
        get(get_manifest)
            .head(head_manifest)
            .put(put_manifest)
            .delete(delete_manifest),
    )
}

/// Digests a manifest points at.
#[derive(Debug, Default, PartialEq, Eq)]
struct References {
    /// Config and layer blobs.
    blobs: Vec<String>,
    /// Child manifests of an index or manifest list.
    manifests: Vec<String>,
}

/// Extract the referenced digests from a manifest body.
fn references(body: &[u8]) -> DepotResult<References> {
    let json: serde_json::Value =
        serde_json::from_slice(body).map_err(|err| DepotError::InvalidManifest(err.to_string()))?;

    let digests = |field: &str, key: &str| -> DepotResult<Vec<String>> {
        let Some(entries) = json.get(field) else {
            return Ok(Vec::new());
        };
        let entries = entries
            .as_array()
            .ok_or_else(|| DepotError::InvalidManifest(format!("\"{field}\" is not a list")))?;
        entries
            .iter()
            .map(|entry| -> DepotResult<String> {
                let digest = entry
                    .get(key)
                    .and_then(|digest| digest.as_str())
                    .ok_or_else(|| {
                        DepotError::InvalidManifest(format!("entry in \"{field}\" has no {key}"))
                    })?;
                validate_digest(digest)?;
                Ok(digest.to_string())
            })
            .collect()
    };

    let mut refs = References::default();
    if let Some(config) = json.get("config") {
        let digest = config
            .get("digest")
            .and_then(|digest| digest.as_str())
            .ok_or_else(|| DepotError::InvalidManifest("config has no digest".into()))?;
        validate_digest(digest)?;
        refs.blobs.push(digest.to_string());
    }
    refs.blobs.extend(digests("layers", "digest")?);
    refs.blobs.extend(digests("fsLayers", "blobSum")?);
    refs.manifests.extend(digests("manifests", "digest")?);

    refs.blobs.sort();
    refs.blobs.dedup();
    Ok(refs)
}

impl Depot {
    /// Store a manifest under `reference`, which is either its digest or a tag.
    ///
    /// Every blob the manifest references must already be mounted into the
    /// repository, and every child manifest of an index must already exist.
    #[tracing::instrument(skip(self, body, cancel), fields(size = body.len()))]
    pub async fn push_manifest(
        &self,
        account: &str,
        repo: &str,
        reference: &str,
        media_type: &str,
        body: Bytes,
        cancel: &CancellationToken,
    ) -> DepotResult<String> {
        validate_name(repo)?;
        validate_manifest_type(media_type)?;

        let (digest, tag) = if is_digest(reference) {
            verify_digest(reference, &body)?;
            (reference.to_string(), None)
        } else {
            validate_tag(reference)?;
            (sha256_digest(&body), Some(reference))
        };
        let refs = references(&body)?;
        self.require_account(account).await?;

        let now = self.now();
        let mut guard = TxGuard::begin(self.db(), "push manifest").await?;
        let repo_row = repos::find_or_create_repo(guard.conn(), account, repo, now).await?;

        let mut blob_ids = Vec::with_capacity(refs.blobs.len());
        for blob_digest in &refs.blobs {
            let blob = blobs::find_mounted_blob(guard.conn(), repo_row.id, blob_digest)
                .await?
                .ok_or_else(|| DepotError::BlobUnknown(blob_digest.clone()))?;
            blob_ids.push(blob.id);
        }
        for child in &refs.manifests {
            if manifests::find_manifest(guard.conn(), repo_row.id, child)
                .await?
                .is_none()
            {
                return Err(DepotError::BlobUnknown(child.clone()));
            }
        }

        manifests::insert_manifest(
            guard.conn(),
            manifests::NewManifest {
                repo_id: repo_row.id,
                digest: &digest,
                media_type,
                size_bytes: body.len() as i64,
            },
            &blob_ids,
            now,
        )
        .await?;
        if let Some(tag) = tag {
            manifests::upsert_tag(guard.conn(), repo_row.id, tag, &digest, now).await?;
        }

        let key = ObjectKey::manifest(repo, &digest);
        let remote = self.storage().put(account, &key, body, cancel).await;
        match settle(guard, remote).await? {
            Settled::Committed => {
                tracing::info!(%digest, "stored manifest");
                Ok(digest)
            }
            Settled::RemoteFailed(error) => Err(DepotError::Backend(error)),
        }
    }

    /// Resolve `reference` (a digest or a tag) to a manifest row.
    pub async fn stat_manifest(
        &self,
        account: &str,
        repo: &str,
        reference: &str,
    ) -> DepotResult<ManifestRow> {
        validate_name(account)?;
        validate_name(repo)?;

        let mut conn = self.db().pool().acquire().await?;
        let repo_row = repos::find_repo(&mut conn, account, repo)
            .await?
            .ok_or_else(|| DepotError::not_found(Resource::Repository, repo))?;

        let digest = if is_digest(reference) {
            validate_digest(reference)?;
            reference.to_string()
        } else {
            validate_tag(reference)?;
            manifests::find_tag(&mut conn, repo_row.id, reference)
                .await?
                .ok_or_else(|| DepotError::not_found(Resource::Tag, reference))?
                .digest
        };

        manifests::find_manifest(&mut conn, repo_row.id, &digest)
            .await?
            .ok_or_else(|| DepotError::not_found(Resource::Manifest, digest))
    }

    /// Read a manifest by digest or tag.
    pub async fn get_manifest(
        &self,
        account: &str,
        repo: &str,
        reference: &str,
        cancel: &CancellationToken,
    ) -> DepotResult<(ManifestRow, Bytes)> {
        let manifest = self.stat_manifest(account, repo, reference).await?;
        let key = ObjectKey::manifest(repo, &manifest.digest);
        let data = self
            .storage()
            .get(account, &key, cancel)
            .await
            .map_err(|error| {
                if error.is_not_found() {
                    DepotError::not_found(Resource::Manifest, &manifest.digest)
                } else {
                    error.into()
                }
            })?;
        Ok((manifest, data))
    }
}

/// Get a manifest
async fn get_manifest(
    State(depot): State<Depot>,
    Path((account, repo, reference)): Path<(String, String, String)>,
) -> DepotResult<Response> {
    let (manifest, data) = depot
        .get_manifest(&account, &repo, &reference, &depot.cancellation())
        .await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, manifest.media_type),
            (DOCKER_CONTENT_DIGEST, manifest.digest),
        ],
        data,
    )
        .into_response())
}

/// Check if a manifest exists
async fn head_manifest(
    State(depot): State<Depot>,
    Path((account, repo, reference)): Path<(String, String, String)>,
) -> DepotResult<Response> {
    let manifest = depot.stat_manifest(&account, &repo, &reference).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, manifest.media_type),
            (DOCKER_CONTENT_DIGEST, manifest.digest),
            (header::CONTENT_LENGTH, manifest.size_bytes.to_string()),
        ],
    )
        .into_response())
}

/// Put a manifest
async fn put_manifest(
    State(depot): State<Depot>,
    Path((account, repo, reference)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> DepotResult<Response> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_MANIFEST_TYPE);

    let digest = depot
        .push_manifest(
            &account,
            &repo,
            &reference,
            content_type,
            body,
            &depot.cancellation(),
        )
        .await?;

    let location = format!("/v2/{account}/{repo}/manifests/{digest}");

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location), (DOCKER_CONTENT_DIGEST, digest)],
    )
        .into_response())
}

/// Delete a manifest. Only digests are accepted; tags are deleted through the
/// `_tags` endpoint.
async fn delete_manifest(
    State(depot): State<Depot>,
    Path((account, repo, reference)): Path<(String, String, String)>,
) -> DepotResult<StatusCode> {
    if !is_digest(&reference) {
        return Err(DepotError::BadRequest(
            "manifests can only be deleted by digest".into(),
        ));
    }

    deletion::delete_manifest(&depot, &account, &repo, &reference, &depot.cancellation()).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Validate manifest type
fn validate_manifest_type(content_type: &str) -> DepotResult<()> {
    match content_type {
        "application/vnd.docker.distribution.manifest.v1+json"
        | "application/vnd.docker.distribution.manifest.v1+prettyjws"
        | "application/vnd.docker.distribution.manifest.v2+json"
        | "application/vnd.docker.distribution.manifest.list.v2+json"
        | "application/vnd.oci.image.manifest.v1+json"
        | "application/vnd.oci.image.index.v1+json" => Ok(()),
        _ => Err(DepotError::UnsupportedManifestType(content_type.to_string())),
    }
}
