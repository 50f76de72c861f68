/*!
Error types for the blobstore backup and restore engine.

Collaborators (buckets and artifacts) report failures as [`StorageError`]. The
orchestration layer wraps those into [`BlobstoreError`] to record *which*
phase failed, but displays the collaborator's text unchanged so operators see
the storage service's own diagnosis.
*/

use thiserror::Error;

/// Result type used throughout the blobstore core.
pub type Result<T> = std::result::Result<T, BlobstoreError>;

/// Result type returned by bucket and artifact collaborators.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Opaque failure reported by a bucket or artifact collaborator.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Message produced by the storage service or adapter
    #[error("{0}")]
    Message(String),

    /// I/O errors during artifact file operations
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    /// Create a new storage error from a message
    pub fn message<S: Into<String>>(msg: S) -> Self {
        Self::Message(msg.into())
    }
}

/// Errors that can abort a backup or restore run.
#[derive(Error, Debug)]
pub enum BlobstoreError {
    /// Listing the versions of a bucket failed
    #[error("{source}")]
    Listing {
        identifier: String,
        source: StorageError,
    },

    /// Saving the artifact failed
    #[error("{source}")]
    Persistence { source: StorageError },

    /// Loading the artifact failed
    #[error("{source}")]
    Load { source: StorageError },

    /// Copying or deleting objects while restoring a bucket failed
    #[error("{source}")]
    Reconciliation {
        identifier: String,
        source: StorageError,
    },

    /// The artifact references a bucket identifier that is not configured
    #[error("no bucket is configured for identifier '{identifier}' found in the backup artifact")]
    ConfigurationMismatch { identifier: String },

    /// Configuration file I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file parse errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration or runtime setup
    #[error("Validation error: {0}")]
    Validation(String),
}

impl BlobstoreError {
    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Bucket identifier the error relates to, if any
    pub fn identifier(&self) -> Option<&str> {
        match self {
            Self::Listing { identifier, .. }
            | Self::Reconciliation { identifier, .. }
            | Self::ConfigurationMismatch { identifier } => Some(identifier),
            _ => None,
        }
    }
}
