//! Backend configuration
//!
//! Stores are built from explicit, typed configuration. A config file at
//! `~/.config/hashbox/config.json` (or any path given on the command line)
//! selects one backend:
//!
//! ```json
//! { "backend": "s3", "endpoint": "http://127.0.0.1:9000",
//!   "access_key": "minio", "secret_key": "minio123", "bucket": "file-server" }
//! ```
//!
//! ```json
//! { "backend": "fs", "root": "/var/lib/hashbox" }
//! ```

use crate::store::{BlobStore, FsStore, S3Store};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Bucket used when none is given
pub const DEFAULT_BUCKET: &str = "file-server";

/// Region sent to the backend when none is given. S3-compatible servers
/// such as MinIO ignore it, but request signing needs one.
pub const DEFAULT_REGION: &str = "us-east-1";

fn default_bucket() -> String {
    DEFAULT_BUCKET.to_string()
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

/// Connection settings for an S3-compatible backend
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct S3Config {
    /// Endpoint URL, e.g. `http://127.0.0.1:9000`
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
}

impl S3Config {
    /// Create a config targeting the default bucket
    pub fn new(
        endpoint: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        S3Config {
            endpoint: endpoint.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            bucket: default_bucket(),
            region: default_region(),
        }
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Check required fields before any connection is attempted
    pub fn validate(&self) -> Result<()> {
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() {
            return Err(Error::Config("S3 endpoint is required".into()));
        }
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(Error::Config(format!(
                "S3 endpoint must be an http(s) URL, got '{}'",
                endpoint
            )));
        }
        if self.access_key.is_empty() {
            return Err(Error::Config("S3 access key is required".into()));
        }
        if self.secret_key.is_empty() {
            return Err(Error::Config("S3 secret key is required".into()));
        }
        if self.region.trim().is_empty() {
            return Err(Error::Config("S3 region must not be empty".into()));
        }
        validate_bucket_name(&self.bucket)
    }
}

// Keeps the secret out of logs and panic messages.
impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .finish()
    }
}

/// S3 bucket naming rules: 3-63 chars of lowercase letters, digits, '-' and
/// '.', starting and ending with a letter or digit.
fn validate_bucket_name(bucket: &str) -> Result<()> {
    let len_ok = (3..=63).contains(&bucket.len());
    let chars_ok = bucket
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.');
    let edges_ok = bucket
        .bytes()
        .next()
        .zip(bucket.bytes().last())
        .map(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric())
        .unwrap_or(false);

    if len_ok && chars_ok && edges_ok {
        Ok(())
    } else {
        Err(Error::Config(format!("Invalid bucket name '{}'", bucket)))
    }
}

/// Settings for the local directory backend
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FsConfig {
    /// Directory holding one sub-directory per stored object
    pub root: PathBuf,
}

impl FsConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsConfig { root: root.into() }
    }
}

/// Which backend to open, as stored in the config file
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum BackendConfig {
    S3(S3Config),
    Fs(FsConfig),
}

impl BackendConfig {
    /// Default config file location (`<config dir>/hashbox/config.json`)
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Could not find config directory".into()))?;
        Ok(config_dir.join("hashbox").join("config.json"))
    }

    /// Load a backend config from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save this config as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Construct the configured store
    pub fn open(&self) -> Result<Box<dyn BlobStore>> {
        match self {
            BackendConfig::S3(config) => Ok(Box::new(S3Store::new(config.clone())?)),
            BackendConfig::Fs(config) => Ok(Box::new(FsStore::new(config.clone())?)),
        }
    }
}
