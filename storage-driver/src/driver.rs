use std::{fmt, ops::Deref, sync::Arc};

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::key::ObjectKey;

/// Object metadata, which will be generically provided by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Metadata {
    /// The size of the object in bytes.
    pub size: u64,

    /// The creation timestamp of the object.
    pub created: DateTime<Utc>,
}

/// A content-addressable blob backend.
///
/// Every object lives in an account namespace and is addressed by an
/// [`ObjectKey`]. Drivers are not transactional; the control plane treats
/// them as an idempotent side effect of database changes.
#[async_trait::async_trait]
pub trait Driver: fmt::Debug {
    /// The name of the driver.
    fn name(&self) -> &'static str;

    /// Store an object, replacing any object with the same key.
    async fn put(&self, account: &str, key: &ObjectKey, data: Bytes) -> Result<(), StorageError>;

    /// Read an object.
    async fn get(&self, account: &str, key: &ObjectKey) -> Result<Bytes, StorageError>;

    /// Delete an object.
    ///
    /// Deleting an object which does not exist must not be an error.
    async fn delete(&self, account: &str, key: &ObjectKey) -> Result<(), StorageError>;

    /// Get the metadata for an object.
    async fn metadata(&self, account: &str, key: &ObjectKey) -> Result<Metadata, StorageError>;

    /// Check whether an object exists.
    async fn exists(&self, account: &str, key: &ObjectKey) -> Result<bool, StorageError> {
        match self.metadata(account, key).await {
            Ok(_) => Ok(true),
            Err(error) if error.is_not_found() => Ok(false),
            Err(error) => Err(error),
        }
    }
}

#[async_trait::async_trait]
impl<D> Driver for Arc<D>
where
    D: ?Sized + Driver + Sync + Send + 'static,
{
    fn name(&self) -> &'static str {
        self.deref().name()
    }

    async fn put(&self, account: &str, key: &ObjectKey, data: Bytes) -> Result<(), StorageError> {
        self.deref().put(account, key, data).await
    }

    async fn get(&self, account: &str, key: &ObjectKey) -> Result<Bytes, StorageError> {
        self.deref().get(account, key).await
    }

    async fn delete(&self, account: &str, key: &ObjectKey) -> Result<(), StorageError> {
        self.deref().delete(account, key).await
    }

    async fn metadata(&self, account: &str, key: &ObjectKey) -> Result<Metadata, StorageError> {
        self.deref().metadata(account, key).await
    }

    async fn exists(&self, account: &str, key: &ObjectKey) -> Result<bool, StorageError> {
        self.deref().exists(account, key).await
    }
}
