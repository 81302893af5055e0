//! # Storage backends
//!
//! Configuration and unification for the blob backends used by the
//! registry control plane.
//!
//! [`Storage`] wraps a [`Driver`] and adds the guarantees the control plane
//! relies on: every call is bounded by a timeout, every call can be
//! cancelled through a [`CancellationToken`], and deletes are idempotent.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use camino::Utf8PathBuf;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

pub(crate) mod local;
pub(crate) mod memory;

#[doc(inline)]
pub use local::LocalDriver;

#[doc(inline)]
pub use memory::MemoryStorage;

#[doc(inline)]
pub use storage_driver::{Driver, Metadata, ObjectKey, StorageError, StorageErrorKind};

/// Default deadline for a single backend call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Backend selection, as it appears in the configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageConfig {
    /// Keep all objects in process memory.
    Memory,

    /// Keep objects below a directory on the local filesystem.
    Local {
        /// Root directory; each account gets a subdirectory.
        path: Utf8PathBuf,
    },
}

impl StorageConfig {
    /// Construct the configured backend.
    #[tracing::instrument]
    pub fn build(self) -> Storage {
        match self {
            StorageConfig::Memory => MemoryStorage::new().into(),
            StorageConfig::Local { path } => LocalDriver::new(path).into(),
        }
    }
}

pub(crate) type ArcDriver = Arc<dyn Driver + Send + Sync>;

/// A handle to a blob backend.
#[derive(Debug, Clone)]
pub struct Storage {
    driver: ArcDriver,
    timeout: Duration,
}

impl<D> From<D> for Storage
where
    D: Driver + Send + Sync + 'static,
{
    fn from(value: D) -> Self {
        Storage::new(value)
    }
}

impl Storage {
    /// Wrap a driver, using [`DEFAULT_TIMEOUT`] for every call.
    pub fn new<D: Driver + Send + Sync + 'static>(driver: D) -> Self {
        Self {
            driver: Arc::new(driver),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Replace the per-call deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Name of the underlying driver.
    pub fn name(&self) -> &'static str {
        self.driver.name()
    }

    /// Run one backend call under the deadline and the caller's cancellation token.
    ///
    /// Cancellation and timeouts surface as errors of kind
    /// [`StorageErrorKind::Cancelled`] and [`StorageErrorKind::TimedOut`].
    async fn bounded<T, F>(&self, cancel: &CancellationToken, call: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        if cancel.is_cancelled() {
            return Err(StorageError::cancelled(self.name()));
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StorageError::cancelled(self.name())),
            result = tokio::time::timeout(self.timeout, call) => match result {
                Ok(result) => result,
                Err(_) => Err(StorageError::timed_out(self.name(), self.timeout)),
            },
        }
    }

    /// Store an object.
    #[tracing::instrument(skip(self, data, cancel), fields(driver = self.driver.name(), %key, size = data.len()))]
    pub async fn put(
        &self,
        account: &str,
        key: &ObjectKey,
        data: Bytes,
        cancel: &CancellationToken,
    ) -> Result<(), StorageError> {
        tracing::trace!("Uploading to: {account}/{key}");
        self.bounded(cancel, self.driver.put(account, key, data))
            .await
    }

    /// Read an object.
    #[tracing::instrument(skip(self, cancel), fields(driver = self.driver.name(), %key))]
    pub async fn get(
        &self,
        account: &str,
        key: &ObjectKey,
        cancel: &CancellationToken,
    ) -> Result<Bytes, StorageError> {
        tracing::trace!("Downloading from: {account}/{key}");
        self.bounded(cancel, self.driver.get(account, key)).await
    }

    /// Check whether an object exists.
    #[tracing::instrument(skip(self, cancel), fields(driver = self.driver.name(), %key))]
    pub async fn exists(
        &self,
        account: &str,
        key: &ObjectKey,
        cancel: &CancellationToken,
    ) -> Result<bool, StorageError> {
        self.bounded(cancel, self.driver.exists(account, key)).await
    }

    /// Delete an object.
    ///
    /// A driver reporting the object as missing counts as success, so a
    /// retried delete never fails on its second attempt.
    #[tracing::instrument(skip(self, cancel), fields(driver = self.driver.name(), %key))]
    pub async fn delete(
        &self,
        account: &str,
        key: &ObjectKey,
        cancel: &CancellationToken,
    ) -> Result<(), StorageError> {
        match self.bounded(cancel, self.driver.delete(account, key)).await {
            Err(error) if error.is_not_found() => {
                tracing::trace!("Object already absent: {account}/{key}");
                Ok(())
            }
            result => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Stalled;

    #[async_trait::async_trait]
    impl Driver for Stalled {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn put(&self, _: &str, _: &ObjectKey, _: Bytes) -> Result<(), StorageError> {
            std::future::pending().await
        }

        async fn get(&self, _: &str, _: &ObjectKey) -> Result<Bytes, StorageError> {
            std::future::pending().await
        }

        async fn delete(&self, _: &str, _: &ObjectKey) -> Result<(), StorageError> {
            std::future::pending().await
        }

        async fn metadata(&self, _: &str, _: &ObjectKey) -> Result<Metadata, StorageError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn stalled_backend_times_out() {
        let storage = Storage::new(Stalled).with_timeout(Duration::from_millis(20));
        let err = storage
            .delete("acme", &ObjectKey::blob("sha256:00"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn cancelled_call_fails() {
        let storage = Storage::new(Stalled);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = storage
            .delete("acme", &ObjectKey::blob("sha256:00"), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn already_cancelled_token_short_circuits() {
        let storage: Storage = MemoryStorage::new().into();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = storage
            .put("acme", &ObjectKey::blob("sha256:00"), Bytes::from_static(b"x"), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::Cancelled);
        assert!(!storage
            .exists("acme", &ObjectKey::blob("sha256:00"), &CancellationToken::new())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn config_builds_memory_backend() {
        let storage = StorageConfig::Memory.build();
        assert_eq!(storage.name(), "memory");
    }
}
