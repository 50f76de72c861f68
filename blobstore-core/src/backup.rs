/*!
Backup orchestration.

A backup run lists every configured bucket, keeps the live version of each
key, and persists the identifier -> [`BucketBackup`] mapping through an
[`Artifact`] in a single call. Any listing failure aborts the run before the
artifact is touched, so a partial artifact is never written.
*/

use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::artifact::Artifact;
use crate::bucket::Bucket;
use crate::version::{latest_versions, BackupArtifact, BucketBackup};
use crate::{BlobstoreError, Result};

/// Captures the live versions of a set of buckets into an artifact
///
/// Buckets are keyed by their caller-assigned identifier, which is what a
/// later restore uses to find the bucket to reconcile.
///
/// # Example
/// ```rust
/// use std::collections::BTreeMap;
/// use blobstore_core::{Backuper, MemoryArtifact, MemoryObjectStore};
///
/// let store = MemoryObjectStore::new();
/// let droplets = store.bucket("my-droplets", "eu-west-1");
/// droplets.put("one", "payload")?;
///
/// let artifact = MemoryArtifact::new();
/// let backuper = Backuper::new(BTreeMap::from([("droplets".to_string(), droplets)]), artifact.clone());
///
/// let backup = backuper.backup()?;
/// assert_eq!(backup["droplets"].len(), 1);
/// assert!(artifact.is_saved());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Backuper<B, A>
where
    B: Bucket,
    A: Artifact,
{
    buckets: BTreeMap<String, B>,
    artifact: A,
}

impl<B, A> Backuper<B, A>
where
    B: Bucket,
    A: Artifact,
{
    /// Create a backuper over `buckets`, persisting into `artifact`
    pub fn new(buckets: BTreeMap<String, B>, artifact: A) -> Self {
        Self { buckets, artifact }
    }

    /// Back up every bucket, one after the other, in identifier order
    ///
    /// Stops at the first bucket whose listing fails; later buckets are not
    /// listed and nothing is saved.
    ///
    /// # Errors
    /// * `BlobstoreError::Listing` - If listing a bucket's versions fails
    /// * `BlobstoreError::Persistence` - If saving the artifact fails
    pub fn backup(&self) -> Result<BackupArtifact> {
        info!(buckets = self.buckets.len(), "Starting backup");

        let mut backup = BackupArtifact::new();
        for (identifier, bucket) in &self.buckets {
            backup.insert(identifier.clone(), capture(identifier, bucket)?);
        }

        self.persist(&backup)?;
        Ok(backup)
    }

    /// Back up every bucket, listing them concurrently
    ///
    /// The artifact is only saved once every listing has succeeded. When
    /// several listings fail, one of their errors is returned.
    pub fn backup_parallel(&self) -> Result<BackupArtifact>
    where
        B: Sync,
    {
        info!(buckets = self.buckets.len(), "Starting parallel backup");

        let backup = self
            .buckets
            .par_iter()
            .map(|(identifier, bucket)| {
                capture(identifier, bucket).map(|captured| (identifier.clone(), captured))
            })
            .collect::<Result<BackupArtifact>>()?;

        self.persist(&backup)?;
        Ok(backup)
    }

    fn persist(&self, backup: &BackupArtifact) -> Result<()> {
        self.artifact
            .save(backup)
            .map_err(|source| BlobstoreError::Persistence { source })?;

        info!(
            buckets = backup.len(),
            objects = backup.values().map(BucketBackup::len).sum::<usize>(),
            "Backup artifact saved"
        );
        Ok(())
    }
}

/// List one bucket and keep the live version of each key
fn capture<B>(identifier: &str, bucket: &B) -> Result<BucketBackup>
where
    B: Bucket + ?Sized,
{
    debug!(identifier, bucket = %bucket.name(), "Listing bucket versions");

    let versions = bucket
        .versions()
        .map_err(|source| BlobstoreError::Listing {
            identifier: identifier.to_string(),
            source,
        })?;
    let latest = latest_versions(&versions);

    info!(
        identifier,
        bucket = %bucket.name(),
        region = %bucket.region_name(),
        versions = versions.len(),
        objects = latest.len(),
        "Captured bucket"
    );

    #[cfg(feature = "metrics")]
    crate::observability::BlobstoreMetrics::global().record_bucket_backed_up();

    Ok(BucketBackup::new(bucket.name(), bucket.region_name(), latest))
}
