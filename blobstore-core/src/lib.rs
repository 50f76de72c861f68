/*!
# Blobstore Backup & Restore Core

Point-in-time backup and restore of versioned object-storage buckets.

A backup records, for every configured bucket, the live version id of each
key. A restore copies exactly those versions back into place (into the same
bucket or a clone) and deletes any key that was not live at backup time.
Nothing is copied at backup time; the storage service's own version history
holds the data.

- Bucket and artifact capabilities as traits, with S3 and in-memory buckets
- Copy-then-delete reconciliation, safe to re-run
- JSON artifact whose field names stay stable across releases
- Structured logging and optional Prometheus metrics

## Usage

```rust
use std::collections::BTreeMap;
use blobstore_core::{Backuper, MemoryArtifact, MemoryObjectStore, Restorer};

let store = MemoryObjectStore::new();
let bucket = store.bucket("my-droplets", "eu-west-1");
bucket.put("one", "first")?;

let artifact = MemoryArtifact::new();
let buckets = || BTreeMap::from([("droplets".to_string(), store.bucket("my-droplets", "eu-west-1"))]);
Backuper::new(buckets(), artifact.clone()).backup()?;

bucket.put("one", "overwritten")?;
bucket.put("two", "added later")?;

Restorer::new(buckets(), artifact).restore()?;
assert_eq!(bucket.get("one").as_deref(), Some(&b"first"[..]));
assert_eq!(bucket.get("two"), None);
# Ok::<(), Box<dyn std::error::Error>>(())
```
*/

pub mod artifact;
pub mod backup;
pub mod bucket;
pub mod config;
pub mod error;
pub mod observability;
pub mod reconcile;
pub mod restore;
pub mod version;


pub use artifact::{Artifact, FileArtifact, MemoryArtifact, ARTIFACT_FILE_NAME};
pub use backup::Backuper;
pub use bucket::{Bucket, FailurePoint, MemoryBucket, MemoryObjectStore};
#[cfg(feature = "s3")]
pub use bucket::S3Bucket;
pub use config::{BucketConfig, BucketsConfig};
pub use error::{BlobstoreError, Result, StorageError, StorageResult};
pub use observability::{init_default_observability, init_observability};
#[cfg(feature = "metrics")]
pub use observability::{BlobstoreMetrics, MetricsTimer};
pub use reconcile::{keys_to_delete, ObjectOperations, ReconcileReport};
pub use restore::{RestoreSummary, Restorer};
pub use version::{latest_versions, BackupArtifact, BucketBackup, LatestVersion, Version};
