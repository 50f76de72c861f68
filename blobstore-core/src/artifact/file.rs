/*!
Local filesystem artifact implementation.
*/

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use super::{from_json, to_json, Artifact};
use crate::error::{StorageError, StorageResult};
use crate::version::BackupArtifact;

/// File name used when the artifact location is given as a directory
pub const ARTIFACT_FILE_NAME: &str = "blobstore.json";

/// Backup artifact stored as a JSON file
///
/// Missing parent directories are created on save. The document is written
/// to a temporary file next to the target and renamed into place, so readers
/// never observe a partially written artifact.
///
/// # Example
/// ```rust
/// use blobstore_core::artifact::FileArtifact;
///
/// let artifact = FileArtifact::in_directory("/var/backups/blobstore");
/// assert!(artifact.path().ends_with("blobstore.json"));
/// ```
#[derive(Debug, Clone)]
pub struct FileArtifact {
    path: PathBuf,
}

impl FileArtifact {
    /// Artifact stored at exactly `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Artifact stored as [`ARTIFACT_FILE_NAME`] inside `dir`
    pub fn in_directory<P: AsRef<Path>>(dir: P) -> Self {
        Self::new(dir.as_ref().join(ARTIFACT_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    /// Ensure the parent directory exists, creating it if necessary
    fn ensure_parent_dir(&self) -> StorageResult<()> {
        let parent = self.parent_dir();
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                StorageError::message(format!(
                    "Failed to create directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        Ok(())
    }
}

impl Artifact for FileArtifact {
    fn save(&self, backup: &BackupArtifact) -> StorageResult<()> {
        let data = to_json(backup)?;
        self.ensure_parent_dir()?;

        let write_error = |e: std::io::Error| {
            StorageError::message(format!(
                "Failed to write backup artifact to {}: {e}",
                self.path.display()
            ))
        };

        let mut file = NamedTempFile::new_in(self.parent_dir()).map_err(write_error)?;
        file.write_all(&data).map_err(write_error)?;
        file.as_file().sync_all().map_err(write_error)?;
        file.persist(&self.path).map_err(|e| write_error(e.error))?;

        debug!(
            path = %self.path.display(),
            buckets = backup.len(),
            bytes = data.len(),
            "Saved backup artifact"
        );
        Ok(())
    }

    fn load(&self) -> StorageResult<BackupArtifact> {
        let data = fs::read(&self.path).map_err(|e| {
            StorageError::message(format!(
                "Failed to read backup artifact from {}: {e}",
                self.path.display()
            ))
        })?;

        let backup = from_json(&data)?;
        debug!(path = %self.path.display(), buckets = backup.len(), "Loaded backup artifact");
        Ok(backup)
    }
}
