/*!
Copy-then-delete reconciliation of a bucket's live key-set.

Given the versions captured in a backup, a destination bucket is brought to
exactly that key-set in two ordered phases:

1. every captured version is copied from the source bucket into the
   destination under the same key, becoming the live version;
2. every key that is live in the destination afterwards but was not captured
   is deleted.

Copying first means a key present both before and after the restore is never
transiently missing, and re-running the procedure on an already restored
bucket only repeats idempotent copies. The first failing copy or delete
aborts the procedure; work already done is not rolled back.
*/

use std::collections::HashSet;
use tracing::{debug, info};

use crate::error::StorageResult;
use crate::version::LatestVersion;

/// Primitive object operations a bucket backend must provide to be reconciled
pub trait ObjectOperations {
    /// Name of the destination bucket, for logging
    fn bucket_name(&self) -> &str;

    /// Copy a specific version of `version.blob_key` from the source bucket
    /// into this bucket under the same key
    fn copy_version(
        &self,
        source_region: &str,
        source_bucket: &str,
        version: &LatestVersion,
    ) -> StorageResult<()>;

    /// Keys that currently have a live version in this bucket
    fn list_live_keys(&self) -> StorageResult<Vec<String>>;

    /// Remove the live version of `key`
    fn delete_object(&self, key: &str) -> StorageResult<()>;
}

/// What a reconciliation changed in the destination bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub copied: usize,
    pub deleted: usize,
}

/// Live keys that are absent from the desired versions, in live-listing order
pub fn keys_to_delete<'a>(live_keys: &'a [String], desired: &[LatestVersion]) -> Vec<&'a str> {
    let desired: HashSet<&str> = desired.iter().map(|v| v.blob_key.as_str()).collect();
    live_keys
        .iter()
        .map(String::as_str)
        .filter(|key| !desired.contains(key))
        .collect()
}

/// Make the live key-set of `target` equal to `versions`, copying each
/// version from `source_bucket` in `source_region`
pub fn reconcile<O>(
    target: &O,
    source_region: &str,
    source_bucket: &str,
    versions: &[LatestVersion],
) -> StorageResult<ReconcileReport>
where
    O: ObjectOperations + ?Sized,
{
    let mut report = ReconcileReport::default();

    for version in versions {
        debug!(
            bucket = %target.bucket_name(),
            source_bucket = %source_bucket,
            key = %version.blob_key,
            version_id = %version.id,
            "Copying object version"
        );
        target.copy_version(source_region, source_bucket, version)?;
        report.copied += 1;

        #[cfg(feature = "metrics")]
        crate::observability::BlobstoreMetrics::global().record_object_copied();
    }

    let live_keys = target.list_live_keys()?;

    for key in keys_to_delete(&live_keys, versions) {
        debug!(bucket = %target.bucket_name(), key = %key, "Deleting object absent from backup");
        target.delete_object(key)?;
        report.deleted += 1;

        #[cfg(feature = "metrics")]
        crate::observability::BlobstoreMetrics::global().record_object_deleted();
    }

    info!(
        bucket = %target.bucket_name(),
        copied = report.copied,
        deleted = report.deleted,
        "Reconciled bucket"
    );

    Ok(report)
}
