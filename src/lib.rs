//! # hashbox
//!
//! Content-addressed file storage with swappable backends.
//!
//! Files are stored under the lowercase hex SHA-1 of their bytes. The key is
//! always derived from content; callers never choose it. Two backends share
//! the [`BlobStore`] contract:
//!
//! - [`S3Store`]: a bucket on any S3-compatible server, path-style addressed,
//!   created on first use
//! - [`FsStore`]: a plain local directory
//!
//! ## Example
//!
//! ```no_run
//! use hashbox::{BlobStore, S3Config, S3Store};
//! use std::path::Path;
//!
//! let store = S3Store::new(S3Config::new("http://127.0.0.1:9000", "minio", "minio123"))?;
//! let hash = store.upload(Path::new("report.pdf"), "report.pdf")?;
//! let bytes = store.download(&hash, None)?;
//! store.delete(&hash)?;
//! # Ok::<(), hashbox::Error>(())
//! ```

pub mod config;
pub mod model;
pub mod store;

mod error;

pub use config::{BackendConfig, FsConfig, S3Config, DEFAULT_BUCKET, DEFAULT_REGION};
pub use error::{Error, Result};
pub use model::ContentHash;
pub use store::{BlobStore, FsStore, S3Store};
