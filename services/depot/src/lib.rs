//! # Depot
//!
//! Control plane for a container image registry: accounts, repositories,
//! manifests, tags and content-addressed blobs, kept in SQLite with the blob
//! bytes on a pluggable backend from the `storage` crate.
//!
//! ## Features
//!
//! - OCI push and pull for blobs and manifests, including cross-repository mounts
//! - Paginated listings (`limit` + `marker`) of repositories, manifests and tags
//! - Manifest and tag deletes which keep the database and the backend consistent
//! - Grace-period mark-and-sweep garbage collection of unreferenced blobs
//!
//! ## Example
//!
//! ```no_run
//! use camino::Utf8Path;
//! use depot::{Database, DepotBuilder};
//! use storage::MemoryStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::open(Utf8Path::new("depot.db"), 1).await?;
//! let depot = DepotBuilder::new(db, MemoryStorage::new().into()).build();
//!
//! tokio::spawn(depot::janitor::run(depot.clone(), depot.cancellation()));
//! let app = depot::router(depot);
//!
//! // Use the router with axum or any tower-compatible server
//! # Ok(())
//! # }
//! ```

mod api;
mod blob;
pub mod clock;
pub mod config;
pub mod db;
pub mod deletion;
mod depot;
mod error;
pub mod gc;
pub mod janitor;
mod manifest;
pub mod names;
pub mod pagination;

pub use api::{ManifestEntry, RepositoryEntry, TagEntry, router};
pub use config::DepotConfig;
pub use db::Database;
pub use depot::{Depot, DepotBuilder};
pub use error::{DepotError, DepotResult, Resource};
