//! Router assembly and the account, repository, manifest and tag listings.

use std::collections::HashMap;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{delete, get, put};
use serde::Serialize;
use serde_json::json;

use crate::db::{ManifestRow, TagRow, manifests, repos};
use crate::deletion;
use crate::depot::Depot;
use crate::error::{DepotError, DepotResult, Resource};
use crate::names::validate_name;
use crate::pagination::{Page, PageRequest};

/// Build the HTTP API for `depot`.
///
/// Returns a Router that can be served with any tower-compatible server
pub fn router(depot: Depot) -> Router {
    Router::new()
        .route("/v2/", get(api_version_check))
        .route("/depot/v1/accounts/{account}", put(create_account))
        .route(
            "/depot/v1/accounts/{account}/repositories",
            get(list_repositories),
        )
        .route(
            "/depot/v1/accounts/{account}/repositories/{repo}/_manifests",
            get(list_manifests),
        )
        .route(
            "/depot/v1/accounts/{account}/repositories/{repo}/_manifests/{digest}",
            delete(delete_manifest),
        )
        .route(
            "/depot/v1/accounts/{account}/repositories/{repo}/_tags",
            get(list_tags),
        )
        .route(
            "/depot/v1/accounts/{account}/repositories/{repo}/_tags/{tag}",
            delete(delete_tag),
        )
        .merge(crate::blob::router())
        .merge(crate::manifest::router())
        .with_state(depot)
}

/// API version check endpoint
///
/// Returns 200 OK to indicate the registry is available
async fn api_version_check() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({})))
}

/// One repository in a listing.
#[derive(Debug, Serialize)]
pub struct RepositoryEntry {
    /// Repository name.
    pub name: String,
}

/// One manifest in a listing, with the tags pointing at it.
#[derive(Debug, Serialize)]
pub struct ManifestEntry {
    /// Manifest digest.
    pub digest: String,
    /// Content type the manifest was pushed with.
    pub media_type: String,
    /// Size of the manifest body.
    pub size_bytes: i64,
    /// UNIX time of the first push.
    pub pushed_at: i64,
    /// Tags pointing at this manifest, by name.
    pub tags: Vec<String>,
}

/// One tag in a listing.
#[derive(Debug, Serialize)]
pub struct TagEntry {
    /// Tag name.
    pub name: String,
    /// Digest of the tagged manifest.
    pub digest: String,
    /// UNIX time the tag was last moved.
    pub pushed_at: i64,
}

impl From<TagRow> for TagEntry {
    fn from(tag: TagRow) -> Self {
        Self {
            name: tag.name,
            digest: tag.digest,
            pushed_at: tag.pushed_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct RepositoryList {
    repositories: Vec<RepositoryEntry>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    truncated: bool,
}

#[derive(Debug, Serialize)]
struct ManifestList {
    manifests: Vec<ManifestEntry>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    truncated: bool,
}

#[derive(Debug, Serialize)]
struct TagList {
    tags: Vec<TagEntry>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    truncated: bool,
}

impl Depot {
    /// One page of the repositories in `account`, ordered by name.
    pub async fn list_repositories(
        &self,
        account: &str,
        request: &PageRequest,
    ) -> DepotResult<Page<RepositoryEntry>> {
        self.require_account(account).await?;
        let query = request.query(&repos::REPOS_BY_NAME)?;

        let mut conn = self.db().pool().acquire().await?;
        let rows = repos::list_repos(&mut conn, account, &query).await?;
        Ok(Page::from_probe(rows, query.limit).map(|repo| RepositoryEntry { name: repo.name }))
    }

    /// One page of the manifests in a repository, ordered by digest.
    pub async fn list_manifests(
        &self,
        account: &str,
        repo: &str,
        request: &PageRequest,
    ) -> DepotResult<Page<ManifestEntry>> {
        validate_name(account)?;
        validate_name(repo)?;
        let query = request.query(&manifests::MANIFESTS_BY_DIGEST)?;

        let mut conn = self.db().pool().acquire().await?;
        let repo_row = repos::find_repo(&mut conn, account, repo)
            .await?
            .ok_or_else(|| DepotError::not_found(Resource::Repository, repo))?;

        let rows = manifests::list_manifests(&mut conn, repo_row.id, &query).await?;
        let page = Page::from_probe(rows, query.limit);

        let digests: Vec<String> = page.items.iter().map(|m| m.digest.clone()).collect();
        let mut tags: HashMap<String, Vec<String>> = HashMap::new();
        for tag in manifests::tags_for_manifests(&mut conn, repo_row.id, &digests).await? {
            tags.entry(tag.digest).or_default().push(tag.name);
        }

        Ok(page.map(|manifest: ManifestRow| ManifestEntry {
            tags: tags.remove(&manifest.digest).unwrap_or_default(),
            digest: manifest.digest,
            media_type: manifest.media_type,
            size_bytes: manifest.size_bytes,
            pushed_at: manifest.pushed_at,
        }))
    }

    /// One page of the tags in a repository, ordered by name.
    pub async fn list_tags(
        &self,
        account: &str,
        repo: &str,
        request: &PageRequest,
    ) -> DepotResult<Page<TagEntry>> {
        validate_name(account)?;
        validate_name(repo)?;
        let query = request.query(&manifests::TAGS_BY_NAME)?;

        let mut conn = self.db().pool().acquire().await?;
        let repo_row = repos::find_repo(&mut conn, account, repo)
            .await?
            .ok_or_else(|| DepotError::not_found(Resource::Repository, repo))?;

        let rows = manifests::list_tags(&mut conn, repo_row.id, &query).await?;
        Ok(Page::from_probe(rows, query.limit).map(TagEntry::from))
    }
}

/// Create an account
async fn create_account(
    State(depot): State<Depot>,
    Path(account): Path<String>,
) -> DepotResult<(StatusCode, Json<serde_json::Value>)> {
    let status = if depot.create_account(&account).await? {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(json!({ "account": { "name": account } }))))
}

/// List repositories in an account
async fn list_repositories(
    State(depot): State<Depot>,
    Path(account): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> DepotResult<Json<RepositoryList>> {
    let request = PageRequest::from_query(&params, depot.max_page_size())?;
    let page = depot.list_repositories(&account, &request).await?;
    Ok(Json(RepositoryList {
        repositories: page.items,
        truncated: page.truncated,
    }))
}

/// List manifests in a repository
async fn list_manifests(
    State(depot): State<Depot>,
    Path((account, repo)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> DepotResult<Json<ManifestList>> {
    let request = PageRequest::from_query(&params, depot.max_page_size())?;
    let page = depot.list_manifests(&account, &repo, &request).await?;
    Ok(Json(ManifestList {
        manifests: page.items,
        truncated: page.truncated,
    }))
}

/// Delete a manifest and its tags
async fn delete_manifest(
    State(depot): State<Depot>,
    Path((account, repo, digest)): Path<(String, String, String)>,
) -> DepotResult<StatusCode> {
    deletion::delete_manifest(&depot, &account, &repo, &digest, &depot.cancellation()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// List tags in a repository
async fn list_tags(
    State(depot): State<Depot>,
    Path((account, repo)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> DepotResult<Json<TagList>> {
    let request = PageRequest::from_query(&params, depot.max_page_size())?;
    let page = depot.list_tags(&account, &repo, &request).await?;
    Ok(Json(TagList {
        tags: page.items,
        truncated: page.truncated,
    }))
}

/// Delete a tag
async fn delete_tag(
    State(depot): State<Depot>,
    Path((account, repo, tag)): Path<(String, String, String)>,
) -> DepotResult<StatusCode> {
    deletion::delete_tag(&depot, &account, &repo, &tag, &depot.cancellation()).await?;
    Ok(StatusCode::NO_CONTENT)
}
