/*!
Backup artifact persistence.

The artifact is the portable output of a backup run: a JSON document mapping
each bucket identifier to its [`BucketBackup`](crate::BucketBackup). This
module defines the artifact capability and its implementations.
*/

pub mod file;

use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{StorageError, StorageResult};
use crate::version::BackupArtifact;

/// Persists and loads the identifier -> bucket backup mapping
#[cfg_attr(test, mockall::automock)]
pub trait Artifact {
    /// Persist the complete mapping in one go
    fn save(&self, backup: &BackupArtifact) -> StorageResult<()>;

    /// Load a previously saved mapping
    fn load(&self) -> StorageResult<BackupArtifact>;
}

impl<A: Artifact + ?Sized> Artifact for &A {
    fn save(&self, backup: &BackupArtifact) -> StorageResult<()> {
        (**self).save(backup)
    }

    fn load(&self) -> StorageResult<BackupArtifact> {
        (**self).load()
    }
}

/// Encode a mapping in the artifact document format
pub fn to_json(backup: &BackupArtifact) -> StorageResult<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(backup)?)
}

/// Decode an artifact document
pub fn from_json(data: &[u8]) -> StorageResult<BackupArtifact> {
    Ok(serde_json::from_slice(data)?)
}

/// Artifact kept in memory as an encoded document
///
/// Clones share the same document, so a test can hand one clone to a
/// backup run and inspect or restore from another.
#[derive(Debug, Clone, Default)]
pub struct MemoryArtifact {
    document: Arc<Mutex<Option<Vec<u8>>>>,
}

impl MemoryArtifact {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw document, if one was saved
    pub fn document(&self) -> Option<Vec<u8>> {
        self.document
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_saved(&self) -> bool {
        self.document().is_some()
    }
}

impl Artifact for MemoryArtifact {
    fn save(&self, backup: &BackupArtifact) -> StorageResult<()> {
        let encoded = to_json(backup)?;
        *self.document.lock().unwrap_or_else(PoisonError::into_inner) = Some(encoded);
        Ok(())
    }

    fn load(&self) -> StorageResult<BackupArtifact> {
        match self.document() {
            Some(data) => from_json(&data),
            None => Err(StorageError::message("no backup artifact has been saved")),
        }
    }
}

// Re-export types for convenience
pub use file::{FileArtifact, ARTIFACT_FILE_NAME};
