use bytes::Bytes;
use camino::{Utf8Path, Utf8PathBuf};
use eyre::WrapErr;
use tokio::io::AsyncWriteExt;

use storage_driver::{Driver, Metadata, ObjectKey, StorageError, StorageErrorKind};

/// Storage driver which keeps objects on the local filesystem.
///
/// Layout: `<root>/<account>/<key path>`.
#[derive(Debug)]
pub struct LocalDriver {
    root: Utf8PathBuf,
}

impl LocalDriver {
    /// Create a driver rooted at `root`. The directory is created on first write.
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    fn path(&self, account: &str, key: &ObjectKey) -> Utf8PathBuf {
        let mut path = self.root.join(account);
        path.push(key.path());
        path
    }

    fn error(
        &self,
        account: &str,
        key: &ObjectKey,
        err: std::io::Error,
        context: &'static str,
    ) -> StorageError {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => StorageErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => StorageErrorKind::PermissionDenied,
            _ => StorageErrorKind::Io,
        };
        StorageError::builder(self.name(), kind, eyre::Report::new(err).wrap_err(context))
            .account(account)
            .key(key.path().as_str())
            .build()
    }
}

#[async_trait::async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn put(&self, account: &str, key: &ObjectKey, data: Bytes) -> Result<(), StorageError> {
        let path = self.path(account, key);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| self.error(account, key, err, "create_dir_all"))?;
        }

        // Write to a sibling first so readers never observe a partial object.
        let staging = staging_path(&path);
        let mut writer = tokio::io::BufWriter::new(
            tokio::fs::File::create(&staging)
                .await
                .map_err(|err| self.error(account, key, err, "open staging file"))?,
        );
        writer
            .write_all(&data)
            .await
            .map_err(|err| self.error(account, key, err, "write"))?;
        writer
            .shutdown()
            .await
            .map_err(|err| self.error(account, key, err, "shutdown writer"))?;

        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|err| self.error(account, key, err, "rename staging file"))?;
        Ok(())
    }

    async fn get(&self, account: &str, key: &ObjectKey) -> Result<Bytes, StorageError> {
        let path = self.path(account, key);
        let data = tokio::fs::read(&path)
            .await
            .map_err(|err| self.error(account, key, err, "read"))?;
        Ok(Bytes::from(data))
    }

    async fn delete(&self, account: &str, key: &ObjectKey) -> Result<(), StorageError> {
        let path = self.path(account, key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.error(account, key, err, "remove_file")),
        }
    }

    async fn metadata(&self, account: &str, key: &ObjectKey) -> Result<Metadata, StorageError> {
        let path = self.path(account, key);
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|err| self.error(account, key, err, "metadata"))?;
        let created = metadata
            .created()
            .or_else(|_| metadata.modified())
            .wrap_err("local driver: timestamps")
            .map_err(|err| {
                StorageError::builder(self.name(), StorageErrorKind::Other, err)
                    .account(account)
                    .key(key.path().as_str())
                    .build()
            })?;
        Ok(Metadata {
            size: metadata.len(),
            created: created.into(),
        })
    }
}

fn staging_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut staging = path.to_owned();
    let name = format!(".{}.partial", path.file_name().unwrap_or("object"));
    staging.set_file_name(name);
    staging
}
