//! Local directory backend
//!
//! Layout:
//! ```text
//! <root>/
//!   <40-char hash>/
//!     <visible name>      one file, the raw blob bytes
//! ```
//!
//! The visible name comes from the upload's display name, falling back to the
//! hash. Uploads are written to a temporary file in `<root>` and renamed into
//! place, so readers never see a partial blob. Placing a blob and removing
//! the names of earlier uploads happen under one store-wide write lock, so
//! concurrent uploads of the same content always leave exactly one file.

use crate::config::FsConfig;
use crate::model::ContentHash;
use crate::store::{persist, read_source, BlobStore};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

static PARTIAL_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Blob store kept in a local directory
#[derive(Debug)]
pub struct FsStore {
    root: PathBuf,
    /// Held for writing while object directories change, for reading while
    /// a blob is looked up and read.
    objects: RwLock<()>,
}

impl FsStore {
    /// Open a store rooted at `config.root`, creating the directory if needed
    pub fn new(config: FsConfig) -> Result<Self> {
        let root = config.root;
        fs::create_dir_all(&root).map_err(|e| {
            Error::Connection(format!(
                "Cannot use store root {}: {}",
                root.display(),
                e
            ))
        })?;

        info!(root = %root.display(), "filesystem store initialized");
        Ok(FsStore {
            root,
            objects: RwLock::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_dir(&self, hash: &ContentHash) -> PathBuf {
        self.root.join(hash.to_hex())
    }

    fn visible_name(post_name: &str, hash: &ContentHash) -> String {
        Path::new(post_name)
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| hash.to_hex())
    }

    /// Path of the stored file for `hash`, if present
    pub fn object_path(&self, hash: &ContentHash) -> Result<Option<PathBuf>> {
        let entries = match fs::read_dir(self.object_dir(hash)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Backend(format!("Failed to list {}: {}", hash, e))),
        };

        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                return Ok(Some(entry.path()));
            }
        }
        Ok(None)
    }

    fn write_object(&self, hash: &ContentHash, name: &str, data: &[u8]) -> std::io::Result<()> {
        let dir = self.object_dir(hash);
        let partial = self.root.join(format!(
            ".{}.{}.{}.partial",
            hash.to_hex(),
            std::process::id(),
            PARTIAL_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        fs::write(&partial, data)?;

        let _guard = self.objects.write();
        let placed = fs::create_dir_all(&dir).and_then(|_| fs::rename(&partial, dir.join(name)));
        if let Err(e) = placed {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }

        // Drop names left by earlier uploads of the same content.
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_name() == name {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Err(e) if e.kind() != ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }
        Ok(())
    }
}

impl BlobStore for FsStore {
    fn upload(&self, file_path: &Path, post_name: &str) -> Result<ContentHash> {
        let data = read_source(file_path)?;
        let hash = ContentHash::digest(&data);
        let name = Self::visible_name(post_name, &hash);

        self.write_object(&hash, &name, &data)
            .map_err(|e| Error::Write {
                key: hash.to_hex(),
                message: e.to_string(),
            })?;

        debug!(key = %hash, name = %name, bytes = data.len(), "stored object");
        Ok(hash)
    }

    fn download(&self, hash: &ContentHash, save_path: Option<&Path>) -> Result<Vec<u8>> {
        let data = {
            let _guard = self.objects.read();
            let path = self
                .object_path(hash)?
                .ok_or_else(|| Error::NotFound(hash.to_hex()))?;

            fs::read(&path).map_err(|e| {
                Error::Backend(format!("Failed to read {}: {}", path.display(), e))
            })?
        };

        debug!(key = %hash, bytes = data.len(), "loaded object");
        persist(save_path, &data)?;
        Ok(data)
    }

    fn delete(&self, hash: &ContentHash) -> Result<()> {
        let _guard = self.objects.write();
        match fs::remove_dir_all(self.object_dir(hash)) {
            Ok(()) => {
                debug!(key = %hash, "deleted object");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Backend(format!("Failed to delete {}: {}", hash, e))),
        }
    }

    fn backend_name(&self) -> &'static str {
        "fs"
    }
}
