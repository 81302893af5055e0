use std::fmt;

use camino::Utf8PathBuf;

/// Address of an object within one account's namespace on the backend.
///
/// Objects are content addressed: the digest is part of every key, so a put
/// of the same key always carries the same bytes and every operation is
/// safe to repeat.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectKey {
    /// A blob (image layer or config), shared by all repositories of the account.
    Blob {
        /// Content digest, e.g. `sha256:abcd...`.
        digest: String,
    },

    /// A manifest, stored per repository.
    Manifest {
        /// Repository name within the account.
        repo: String,
        /// Content digest of the manifest bytes.
        digest: String,
    },
}

impl ObjectKey {
    /// Key for a blob.
    pub fn blob(digest: impl Into<String>) -> Self {
        ObjectKey::Blob {
            digest: digest.into(),
        }
    }

    /// Key for a manifest in a repository.
    pub fn manifest(repo: impl Into<String>, digest: impl Into<String>) -> Self {
        ObjectKey::Manifest {
            repo: repo.into(),
            digest: digest.into(),
        }
    }

    /// The digest this key addresses.
    pub fn digest(&self) -> &str {
        match self {
            ObjectKey::Blob { digest } | ObjectKey::Manifest { digest, .. } => digest,
        }
    }

    /// Relative path of the object inside the account namespace.
    ///
    /// Blobs live at `blobs/<algorithm>/<hex>`, manifests at
    /// `manifests/<repo>/<digest>`.
    pub fn path(&self) -> Utf8PathBuf {
        match self {
            ObjectKey::Blob { digest } => match digest.split_once(':') {
                Some((algorithm, hex)) => Utf8PathBuf::from(format!("blobs/{algorithm}/{hex}")),
                None => Utf8PathBuf::from(format!("blobs/sha256/{digest}")),
            },
            ObjectKey::Manifest { repo, digest } => {
                Utf8PathBuf::from(format!("manifests/{repo}/{digest}"))
            }
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_paths() {
        let key = ObjectKey::blob("sha256:abcdef123456");
        assert_eq!(key.path().as_str(), "blobs/sha256/abcdef123456");
        assert_eq!(key.digest(), "sha256:abcdef123456");
    }

    #[test]
    fn manifest_paths() {
        let key = ObjectKey::manifest("myrepo", "sha256:abcdef123456");
        assert_eq!(key.path().as_str(), "manifests/myrepo/sha256:abcdef123456");
    }
}
