//! Content-addressed blob store.
//!
//! Blobs are keyed by the lowercase hex SHA-256 of their bytes and laid
//! out with two-character sharding:
//!
//! ```text
//! <root>/
//!   3f/
//!     3fa1…e9      # raw bytes, no metadata file
//!   a0/
//!     a07c…12
//! ```
//!
//! Content under a digest never changes, so `put` is idempotent and two
//! writers racing on the same digest are harmless. Each write lands in a
//! uniquely named temporary file in the shard directory and is renamed
//! into place, so a reader never observes a partial blob.

use std::fs;
use std::path::{Path, PathBuf};

use codex_bridge_core::hash::{is_sha256_hex, sha256_hex};
use uuid::Uuid;

use crate::error::PluginError;

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store `bytes` and return their digest.
    pub fn put(&self, bytes: &[u8]) -> Result<String, PluginError> {
        let digest = sha256_hex(bytes);
        let dest = self.blob_path(&digest);

        if let Ok(meta) = fs::metadata(&dest) {
            if meta.is_file() && meta.len() == bytes.len() as u64 {
                tracing::trace!(%digest, "blob already present");
                return Ok(digest);
            }
        }

        let shard = dest.parent().unwrap_or(&self.root);
        fs::create_dir_all(shard).map_err(|e| PluginError::io("create blob directory", e))?;

        let tmp = shard.join(format!(".{}.{}.tmp", digest, Uuid::new_v4()));
        fs::write(&tmp, bytes).map_err(|e| PluginError::io("write blob", e))?;
        if let Err(e) = fs::rename(&tmp, &dest) {
            let _ = fs::remove_file(&tmp);
            return Err(PluginError::io("move blob into place", e));
        }

        tracing::debug!(%digest, size = bytes.len(), "stored blob");
        Ok(digest)
    }

    /// Location of `digest`, whether or not it is stored yet.
    pub fn path(&self, digest: &str) -> Result<PathBuf, PluginError> {
        if !is_sha256_hex(digest) {
            return Err(PluginError::Argument(format!(
                "'{}' is not a sha256 hex digest",
                digest
            )));
        }
        Ok(self.blob_path(digest))
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.path(digest).map(|p| p.is_file()).unwrap_or(false)
    }

    pub fn get(&self, digest: &str) -> Result<Vec<u8>, PluginError> {
        let path = self.path(digest)?;
        fs::read(&path).map_err(|e| PluginError::io(format!("read blob {}", digest), e))
    }

    fn blob_path(&self, digest: &str) -> PathBuf {
        self.root.join(&digest[..2]).join(digest)
    }
}
