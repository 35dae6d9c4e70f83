//! Content-addressed blob stores
//!
//! A store keeps opaque byte blobs under the hex SHA-1 of their content.
//! Two backends implement the same [`BlobStore`] contract and can be swapped
//! at the call site:
//!
//! - [`S3Store`]: an S3-compatible bucket, addressed path-style
//! - [`FsStore`]: a local directory

mod fs_store;
mod s3_store;

pub use fs_store::FsStore;
pub use s3_store::S3Store;

use crate::model::ContentHash;
use crate::{Error, Result};
use std::path::Path;

/// The upload/download/delete contract shared by every backend
///
/// Every call is a single blocking request against the backend. Nothing is
/// retried; every failure is returned to the caller.
pub trait BlobStore: Send + Sync {
    /// Store the contents of a local file and return its content hash
    ///
    /// `post_name` is the caller's display name for the file. Backends that
    /// keep a visible file name use it; the key is always the content hash.
    fn upload(&self, file_path: &Path, post_name: &str) -> Result<ContentHash>;

    /// Fetch a blob by hash, optionally also writing it to `save_path`
    ///
    /// The local write only happens after the fetch succeeded and overwrites
    /// whatever is at `save_path`.
    fn download(&self, hash: &ContentHash, save_path: Option<&Path>) -> Result<Vec<u8>>;

    /// Remove a blob. Deleting an absent hash succeeds.
    fn delete(&self, hash: &ContentHash) -> Result<()>;

    /// Short backend identifier for logs and CLI output
    fn backend_name(&self) -> &'static str;
}

impl<T: BlobStore + ?Sized> BlobStore for Box<T> {
    fn upload(&self, file_path: &Path, post_name: &str) -> Result<ContentHash> {
        (**self).upload(file_path, post_name)
    }

    fn download(&self, hash: &ContentHash, save_path: Option<&Path>) -> Result<Vec<u8>> {
        (**self).download(hash, save_path)
    }

    fn delete(&self, hash: &ContentHash) -> Result<()> {
        (**self).delete(hash)
    }

    fn backend_name(&self) -> &'static str {
        (**self).backend_name()
    }
}

/// Read a whole upload source into memory
pub(crate) fn read_source(file_path: &Path) -> Result<Vec<u8>> {
    std::fs::read(file_path).map_err(|e| Error::read(file_path, e))
}

/// Persist downloaded bytes to the caller's save path, if any
pub(crate) fn persist(save_path: Option<&Path>, data: &[u8]) -> Result<()> {
    if let Some(path) = save_path {
        std::fs::write(path, data).map_err(|e| Error::read(path, e))?;
        tracing::debug!(path = %path.display(), bytes = data.len(), "saved download");
    }
    Ok(())
}
