use std::collections::HashMap;

use bytes::Bytes;
use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use storage_driver::{Driver, Metadata, ObjectKey, StorageError, StorageErrorKind};

#[derive(Debug)]
struct MemoryObject {
    created: DateTime<Utc>,
    data: Bytes,
}

impl From<Bytes> for MemoryObject {
    fn from(data: Bytes) -> Self {
        Self {
            created: Utc::now(),
            data,
        }
    }
}

impl From<&MemoryObject> for Metadata {
    fn from(value: &MemoryObject) -> Self {
        Self {
            created: value.created,
            size: value.data.len() as u64,
        }
    }
}

/// Storage driver that stores objects in memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    accounts: RwLock<HashMap<String, HashMap<Utf8PathBuf, MemoryObject>>>,
}

impl MemoryStorage {
    /// Create a new, empty `MemoryStorage` instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects stored for an account.
    pub async fn object_count(&self, account: &str) -> usize {
        self.accounts
            .read()
            .await
            .get(account)
            .map(HashMap::len)
            .unwrap_or_default()
    }

    fn not_found(&self, account: &str, key: &ObjectKey) -> StorageError {
        StorageError::builder(
            self.name(),
            StorageErrorKind::NotFound,
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Object not found: {key}"),
            ),
        )
        .account(account)
        .key(key.path().as_str())
        .build()
    }
}

#[async_trait::async_trait]
impl Driver for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, account: &str, key: &ObjectKey, data: Bytes) -> Result<(), StorageError> {
        let mut accounts = self.accounts.write().await;
        accounts
            .entry(account.to_string())
            .or_default()
            .insert(key.path(), data.into());
        Ok(())
    }

    async fn get(&self, account: &str, key: &ObjectKey) -> Result<Bytes, StorageError> {
        let accounts = self.accounts.read().await;
        accounts
            .get(account)
            .and_then(|objects| objects.get(&key.path()))
            .map(|object| object.data.clone())
            .ok_or_else(|| self.not_found(account, key))
    }

    async fn delete(&self, account: &str, key: &ObjectKey) -> Result<(), StorageError> {
        let mut accounts = self.accounts.write().await;
        if let Some(objects) = accounts.get_mut(account) {
            objects.remove(&key.path());
        }
        Ok(())
    }

    async fn metadata(&self, account: &str, key: &ObjectKey) -> Result<Metadata, StorageError> {
        let accounts = self.accounts.read().await;
        accounts
            .get(account)
            .and_then(|objects| objects.get(&key.path()))
            .map(Metadata::from)
            .ok_or_else(|| self.not_found(account, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete() {
        let storage = MemoryStorage::new();
        let key = ObjectKey::blob("sha256:abcd");

        storage
            .put("acme", &key, Bytes::from_static(b"layer"))
            .await
            .unwrap();
        assert!(storage.exists("acme", &key).await.unwrap());
        assert!(!storage.exists("other", &key).await.unwrap());
        assert_eq!(&storage.get("acme", &key).await.unwrap()[..], b"layer");
        assert_eq!(storage.metadata("acme", &key).await.unwrap().size, 5);

        storage.delete("acme", &key).await.unwrap();
        assert!(!storage.exists("acme", &key).await.unwrap());
        assert_eq!(
            storage.get("acme", &key).await.unwrap_err().kind(),
            StorageErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn delete_twice_is_not_an_error() {
        let storage = MemoryStorage::new();
        let key = ObjectKey::manifest("repo", "sha256:abcd");
        storage.put("acme", &key, Bytes::new()).await.unwrap();

        storage.delete("acme", &key).await.unwrap();
        storage.delete("acme", &key).await.unwrap();
        storage.delete("unknown-account", &key).await.unwrap();
        assert_eq!(storage.object_count("acme").await, 0);
    }
}
