/*!
Restore orchestration.

A restore run loads a backup artifact and reconciles each configured bucket
so its live key-set matches the versions captured for the same identifier.
Versions are copied from the bucket recorded in the artifact, which makes it
possible to restore into a clone with a different name or region.
*/

use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::artifact::Artifact;
use crate::bucket::Bucket;
use crate::{BlobstoreError, Result};

/// What a restore run changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub buckets_restored: usize,
    pub objects_copied: usize,
    pub objects_deleted: usize,
}

/// Reconciles a set of buckets to the state recorded in an artifact
pub struct Restorer<B, A>
where
    B: Bucket,
    A: Artifact,
{
    buckets: BTreeMap<String, B>,
    artifact: A,
}

impl<B, A> Restorer<B, A>
where
    B: Bucket,
    A: Artifact,
{
    /// Create a restorer reconciling `buckets` from `artifact`
    pub fn new(buckets: BTreeMap<String, B>, artifact: A) -> Self {
        Self { buckets, artifact }
    }

    /// Restore every bucket recorded in the artifact, in identifier order
    ///
    /// Every identifier in the artifact must have a configured bucket; this
    /// is checked before any bucket is modified. Configured buckets that the
    /// artifact does not mention are left alone. The first failing
    /// reconciliation ends the run and buckets restored before it stay
    /// restored.
    ///
    /// # Errors
    /// * `BlobstoreError::Load` - If the artifact cannot be loaded
    /// * `BlobstoreError::ConfigurationMismatch` - If the artifact names an unconfigured identifier
    /// * `BlobstoreError::Reconciliation` - If copying or deleting objects fails
    pub fn restore(&self) -> Result<RestoreSummary> {
        let backup = self
            .artifact
            .load()
            .map_err(|source| BlobstoreError::Load { source })?;

        info!(buckets = backup.len(), "Starting restore");

        if let Some(identifier) = backup.keys().find(|id| !self.buckets.contains_key(*id)) {
            return Err(BlobstoreError::ConfigurationMismatch {
                identifier: identifier.clone(),
            });
        }
        for identifier in self.buckets.keys().filter(|id| !backup.contains_key(*id)) {
            warn!(identifier = %identifier, "Configured bucket has no entry in the backup artifact, skipping");
        }

        let mut summary = RestoreSummary::default();
        for (identifier, bucket_backup) in &backup {
            let Some(bucket) = self.buckets.get(identifier) else {
                continue;
            };

            info!(
                identifier = %identifier,
                bucket = %bucket.name(),
                source_bucket = %bucket_backup.bucket_name,
                source_region = %bucket_backup.region_name,
                objects = bucket_backup.len(),
                "Restoring bucket"
            );

            let report = bucket
                .reconcile(
                    &bucket_backup.region_name,
                    &bucket_backup.bucket_name,
                    &bucket_backup.versions,
                )
                .map_err(|source| BlobstoreError::Reconciliation {
                    identifier: identifier.clone(),
                    source,
                })?;

            summary.buckets_restored += 1;
            summary.objects_copied += report.copied;
            summary.objects_deleted += report.deleted;

            #[cfg(feature = "metrics")]
            crate::observability::BlobstoreMetrics::global().record_bucket_restored();
        }

        info!(
            buckets = summary.buckets_restored,
            copied = summary.objects_copied,
            deleted = summary.objects_deleted,
            "Restore complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::MockArtifact;
    use crate::error::{StorageError, StorageResult};
    use crate::reconcile::ReconcileReport;
    use crate::version::{BackupArtifact, BucketBackup, LatestVersion, Version};
    use std::cell::RefCell;
    use std::rc::Rc;

    type CallLog = Rc<RefCell<Vec<(String, String, String, Vec<LatestVersion>)>>>;

    /// Bucket double recording reconcile calls
    struct FakeBucket {
        name: String,
        error: Option<String>,
        calls: CallLog,
    }

    impl FakeBucket {
        fn new(name: &str, calls: &CallLog) -> Self {
            Self {
                name: name.to_string(),
                error: None,
                calls: Rc::clone(calls),
            }
        }

        fn failing(mut self, message: &str) -> Self {
            self.error = Some(message.to_string());
            self
        }
    }

    impl Bucket for FakeBucket {
        fn name(&self) -> &str {
            &self.name
        }

        fn region_name(&self) -> &str {
            "target-region"
        }

        fn versions(&self) -> StorageResult<Vec<Version>> {
            panic!("restore must not list versions");
        }

        fn reconcile(
            &self,
            source_region: &str,
            source_bucket: &str,
            versions: &[LatestVersion],
        ) -> StorageResult<ReconcileReport> {
            self.calls.borrow_mut().push((
                self.name.clone(),
                source_region.to_string(),
                source_bucket.to_string(),
                versions.to_vec(),
            ));
            match &self.error {
                Some(message) => Err(StorageError::message(message.clone())),
                None => Ok(ReconcileReport {
                    copied: versions.len(),
                    deleted: 1,
                }),
            }
        }
    }

    fn artifact_returning(backup: BackupArtifact) -> MockArtifact {
        let mut artifact = MockArtifact::new();
        artifact
            .expect_load()
            .times(1)
            .returning(move || Ok(backup.clone()));
        artifact
    }

    fn droplets_backup() -> BucketBackup {
        BucketBackup::new(
            "my_droplets_bucket",
            "my_droplets_region",
            vec![LatestVersion::new("one", "13"), LatestVersion::new("two", "22")],
        )
    }

    #[test]
    fn test_restore_reconciles_from_recorded_source() {
        let calls = CallLog::default();
        let buckets = BTreeMap::from([("droplets".to_string(), FakeBucket::new("clone-bucket", &calls))]);
        let backup = BackupArtifact::from([("droplets".to_string(), droplets_backup())]);

        let summary = Restorer::new(buckets, artifact_returning(backup))
            .restore()
            .unwrap();

        assert_eq!(
            *calls.borrow(),
            vec![(
                "clone-bucket".to_string(),
                "my_droplets_region".to_string(),
                "my_droplets_bucket".to_string(),
                droplets_backup().versions,
            )]
        );
        assert_eq!(
            summary,
            RestoreSummary {
                buckets_restored: 1,
                objects_copied: 2,
                objects_deleted: 1,
            }
        );
    }

    #[test]
    fn test_load_failure_touches_no_bucket() {
        let calls = CallLog::default();
        let buckets = BTreeMap::from([("droplets".to_string(), FakeBucket::new("b", &calls))]);

        let mut artifact = MockArtifact::new();
        artifact
            .expect_load()
            .times(1)
            .returning(|| Err(StorageError::message("failed to load backup")));

        let err = Restorer::new(buckets, artifact).restore().unwrap_err();
        assert!(matches!(err, BlobstoreError::Load { .. }));
        assert_eq!(err.to_string(), "failed to load backup");
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn test_unconfigured_identifier_is_rejected_before_any_change() {
        let calls = CallLog::default();
        let buckets = BTreeMap::from([("droplets".to_string(), FakeBucket::new("b", &calls))]);
        let backup = BackupArtifact::from([
            ("droplets".to_string(), droplets_backup()),
            ("packages".to_string(), BucketBackup::new("p", "r", vec![])),
        ]);

        let err = Restorer::new(buckets, artifact_returning(backup))
            .restore()
            .unwrap_err();

        assert!(matches!(err, BlobstoreError::ConfigurationMismatch { .. }));
        assert_eq!(err.identifier(), Some("packages"));
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn test_configured_bucket_missing_from_artifact_is_skipped() {
        let calls = CallLog::default();
        let buckets = BTreeMap::from([
            ("droplets".to_string(), FakeBucket::new("droplets-bucket", &calls)),
            ("packages".to_string(), FakeBucket::new("packages-bucket", &calls)),
        ]);
        let backup = BackupArtifact::from([("droplets".to_string(), droplets_backup())]);

        let summary = Restorer::new(buckets, artifact_returning(backup))
            .restore()
            .unwrap();

        assert_eq!(summary.buckets_restored, 1);
        assert_eq!(calls.borrow().len(), 1);
        assert_eq!(calls.borrow()[0].0, "droplets-bucket");
    }

    #[test]
    fn test_first_reconcile_failure_stops_the_run() {
        let calls = CallLog::default();
        let buckets = BTreeMap::from([
            ("a".to_string(), FakeBucket::new("bucket-a", &calls)),
            ("b".to_string(), FakeBucket::new("bucket-b", &calls).failing("failed to restore")),
            ("c".to_string(), FakeBucket::new("bucket-c", &calls)),
        ]);
        let backup = BackupArtifact::from([
            ("a".to_string(), droplets_backup()),
            ("b".to_string(), droplets_backup()),
            ("c".to_string(), droplets_backup()),
        ]);

        let err = Restorer::new(buckets, artifact_returning(backup))
            .restore()
            .unwrap_err();

        assert_eq!(err.to_string(), "failed to restore");
        assert_eq!(err.identifier(), Some("b"));
        let restored: Vec<String> = calls.borrow().iter().map(|call| call.0.clone()).collect();
        assert_eq!(restored, vec!["bucket-a", "bucket-b"]);
    }

    #[test]
    fn test_empty_artifact_is_a_no_op() {
        let calls = CallLog::default();
        let buckets = BTreeMap::from([("droplets".to_string(), FakeBucket::new("b", &calls))]);

        let summary = Restorer::new(buckets, artifact_returning(BackupArtifact::new()))
            .restore()
            .unwrap();

        assert_eq!(summary, RestoreSummary::default());
        assert!(calls.borrow().is_empty());
    }
}
