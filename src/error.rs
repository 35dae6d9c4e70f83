//! Error types for hashbox

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for hashbox operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in hashbox operations
#[derive(Error, Debug)]
pub enum Error {
    /// Backend unreachable, credentials rejected, or storage root unusable
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Failed to create bucket '{bucket}': {message}")]
    BucketCreation { bucket: String, message: String },

    /// A local file could not be read, or a save path could not be written
    #[error("Local file error at {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Write rejected for object {key}: {message}")]
    Write { key: String, message: String },

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Read {
            path: path.into(),
            source,
        }
    }

    /// Whether this error reports a missing object
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
