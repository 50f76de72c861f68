/*!
Versioned bucket abstraction.

This module defines the bucket capability (port) used by the backup and
restore orchestration, and its implementations (adapters): an S3 bucket backed
by the AWS SDK and an in-memory versioned store for tests and dry runs.
*/

pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

use crate::error::StorageResult;
use crate::reconcile::ReconcileReport;
use crate::version::{LatestVersion, Version};

#[cfg(feature = "async-rt")]
use once_cell::sync::OnceCell;
#[cfg(feature = "async-rt")]
use tokio::runtime::Runtime;

#[cfg(feature = "async-rt")]
static GLOBAL_RT: OnceCell<Runtime> = OnceCell::new();

/// Shared runtime used to drive async SDK calls from the blocking bucket API
#[cfg(feature = "async-rt")]
pub(crate) fn runtime() -> StorageResult<&'static Runtime> {
    GLOBAL_RT
        .get_or_try_init(|| {
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(num_cpus::get().max(4))
                .enable_all()
                .build()
        })
        .map_err(|e| {
            crate::error::StorageError::message(format!("Failed to create async runtime: {e}"))
        })
}

/// One versioned storage bucket
///
/// Errors returned by any method are opaque collaborator failures; the
/// orchestration layer propagates their text unchanged.
pub trait Bucket {
    /// Physical bucket name
    fn name(&self) -> &str;

    /// Region the bucket lives in
    fn region_name(&self) -> &str;

    /// Every stored object version, including non-live ones
    fn versions(&self) -> StorageResult<Vec<Version>>;

    /// Make this bucket's live key-set equal `versions`, copying each version
    /// from `source_bucket` in `source_region`
    ///
    /// Implementations follow the copy-then-delete procedure in
    /// [`crate::reconcile`].
    fn reconcile(
        &self,
        source_region: &str,
        source_bucket: &str,
        versions: &[LatestVersion],
    ) -> StorageResult<ReconcileReport>;
}

impl<B: Bucket + ?Sized> Bucket for Box<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn region_name(&self) -> &str {
        (**self).region_name()
    }

    fn versions(&self) -> StorageResult<Vec<Version>> {
        (**self).versions()
    }

    fn reconcile(
        &self,
        source_region: &str,
        source_bucket: &str,
        versions: &[LatestVersion],
    ) -> StorageResult<ReconcileReport> {
        (**self).reconcile(source_region, source_bucket, versions)
    }
}

// Re-export types for convenience
pub use memory::{FailurePoint, MemoryBucket, MemoryObjectStore};
#[cfg(feature = "s3")]
pub use s3::S3Bucket;
