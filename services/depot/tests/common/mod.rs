//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use camino::Utf8PathBuf;
use chrono::TimeDelta;
use depot::clock::ManualClock;
use depot::config::GcConfig;
use depot::db::{AccountRow, BlobRow, accounts, blobs};
use depot::gc::{SweepReport, sweep_blobs_in_next_account};
use depot::names::sha256_digest;
use depot::{Database, Depot, DepotBuilder, DepotResult};
use storage::{Driver, MemoryStorage, Metadata, ObjectKey, StorageError, StorageErrorKind};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const ACCOUNT: &str = "acme";
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// Sweep every hour, delete after four hours.
pub fn gc_config() -> GcConfig {
    GcConfig {
        sweep_interval_secs: 60 * 60,
        grace_period_secs: 4 * 60 * 60,
        poll_interval_secs: 1,
    }
}

/// In-memory backend whose deletes can be made to fail.
#[derive(Debug, Default)]
pub struct FaultyDriver {
    inner: MemoryStorage,
    delete_failure: Mutex<Option<StorageErrorKind>>,
    deletes: AtomicUsize,
}

impl FaultyDriver {
    /// Make every delete fail with an I/O error, or stop doing so.
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes_with(fail.then_some(StorageErrorKind::Io));
    }

    pub fn fail_deletes_with(&self, kind: Option<StorageErrorKind>) {
        *self.delete_failure.lock() = kind;
    }

    /// Number of delete calls which reached the driver, failed or not.
    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub async fn contains(&self, account: &str, key: &ObjectKey) -> bool {
        self.inner.exists(account, key).await.unwrap()
    }

    pub async fn object_count(&self, account: &str) -> usize {
        self.inner.object_count(account).await
    }
}

#[async_trait::async_trait]
impl Driver for FaultyDriver {
    fn name(&self) -> &'static str {
        "faulty"
    }

    async fn put(&self, account: &str, key: &ObjectKey, data: Bytes) -> Result<(), StorageError> {
        self.inner.put(account, key, data).await
    }

    async fn get(&self, account: &str, key: &ObjectKey) -> Result<Bytes, StorageError> {
        self.inner.get(account, key).await
    }

    async fn delete(&self, account: &str, key: &ObjectKey) -> Result<(), StorageError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let failure = *self.delete_failure.lock();
        if let Some(kind) = failure {
            return Err(StorageError::builder(
                self.name(),
                kind,
                std::io::Error::other("injected delete failure"),
            )
            .account(account)
            .key(key.path().as_str())
            .build());
        }
        self.inner.delete(account, key).await
    }

    async fn metadata(&self, account: &str, key: &ObjectKey) -> Result<Metadata, StorageError> {
        self.inner.metadata(account, key).await
    }
}

/// An image pushed by [`TestDepot::push_image`].
#[derive(Debug, Clone)]
pub struct Image {
    pub digest: String,
    pub config: String,
    pub layer: String,
}

/// A depot on a fresh database file, with a manual clock and a faulty backend.
#[derive(Debug)]
pub struct TestDepot {
    pub depot: Depot,
    pub clock: ManualClock,
    pub driver: Arc<FaultyDriver>,
    pub cancel: CancellationToken,
    _dir: TempDir,
}

impl TestDepot {
    /// A depot with the account [`ACCOUNT`] already created.
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("depot.db")).unwrap();
        let db = Database::open(&path, 1).await.unwrap();

        let driver = Arc::new(FaultyDriver::default());
        let clock = ManualClock::default();
        let depot = DepotBuilder::new(db, storage::Storage::new(driver.clone()))
            .clock(clock.clone())
            .gc(gc_config())
            .build();
        depot.create_account(ACCOUNT).await.unwrap();

        Self {
            depot,
            clock,
            driver,
            cancel: CancellationToken::new(),
            _dir: dir,
        }
    }

    pub fn advance(&self, by: TimeDelta) {
        self.clock.advance(by);
    }

    pub async fn sweep(&self) -> DepotResult<SweepReport> {
        sweep_blobs_in_next_account(&self.depot, &self.cancel).await
    }

    pub async fn account(&self, name: &str) -> AccountRow {
        let mut conn = self.depot.db().pool().acquire().await.unwrap();
        accounts::find_account(&mut conn, name).await.unwrap().unwrap()
    }

    /// The blob row for `digest`, wherever it is mounted.
    pub async fn blob(&self, digest: &str) -> Option<BlobRow> {
        let mut conn = self.depot.db().pool().acquire().await.unwrap();
        blobs::find_blob(&mut conn, ACCOUNT, digest).await.unwrap()
    }

    pub async fn in_backend(&self, digest: &str) -> bool {
        self.driver.contains(ACCOUNT, &ObjectKey::blob(digest)).await
    }

    /// Push `data` as a blob into `repo`, returning its digest.
    pub async fn push_blob(&self, repo: &str, data: &[u8]) -> String {
        let digest = sha256_digest(data);
        self.depot
            .push_blob(
                ACCOUNT,
                repo,
                &digest,
                Bytes::copy_from_slice(data),
                &self.cancel,
            )
            .await
            .unwrap();
        digest
    }

    /// Push a config blob, one layer and an image manifest referencing both.
    pub async fn push_image(&self, repo: &str, tag: Option<&str>, layer: &[u8]) -> Image {
        let config = self
            .push_blob(repo, format!("config for {}", sha256_digest(layer)).as_bytes())
            .await;
        let layer = self.push_blob(repo, layer).await;

        let body = image_manifest(&config, &[layer.as_str()]);
        let digest = sha256_digest(&body);
        let reference = tag.unwrap_or(digest.as_str());
        self.depot
            .push_manifest(ACCOUNT, repo, reference, OCI_MANIFEST, body, &self.cancel)
            .await
            .unwrap();

        Image {
            digest,
            config,
            layer,
        }
    }
}

/// An OCI image manifest body.
pub fn image_manifest(config: &str, layers: &[&str]) -> Bytes {
    let layers: Vec<_> = layers
        .iter()
        .map(|digest| {
            serde_json::json!({
                "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                "digest": digest,
                "size": 1,
            })
        })
        .collect();

    let manifest = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": OCI_MANIFEST,
        "config": {
            "mediaType": "application/vnd.oci.image.config.v1+json",
            "digest": config,
            "size": 1,
        },
        "layers": layers,
    });
    Bytes::from(serde_json::to_vec(&manifest).unwrap())
}
