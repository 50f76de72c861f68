/*!
In-memory versioned object store.

Buckets share one [`MemoryObjectStore`], so restoring from one bucket into
another copies versions the same way a server-side copy would. Deleting a key
adds a delete marker and keeps its history, as a versioned bucket does.
*/

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::Bucket;
use crate::error::{StorageError, StorageResult};
use crate::reconcile::{self, ObjectOperations, ReconcileReport};
use crate::version::{LatestVersion, Version};

/// Operation of a memory bucket that can be made to fail
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    ListVersions,
    Copy(String),
    ListLiveKeys,
    Delete(String),
}

#[derive(Debug, Clone)]
struct StoredVersion {
    id: String,
    content: Option<Vec<u8>>,
}

impl StoredVersion {
    fn is_delete_marker(&self) -> bool {
        self.content.is_none()
    }
}

#[derive(Debug, Default)]
struct BucketState {
    region: String,
    // oldest first; the last entry is the live one
    objects: BTreeMap<String, Vec<StoredVersion>>,
    failures: HashMap<FailurePoint, String>,
}

impl BucketState {
    fn live(&self, key: &str) -> Option<&StoredVersion> {
        self.objects
            .get(key)
            .and_then(|history| history.last())
            .filter(|v| !v.is_delete_marker())
    }

    fn check(&self, point: &FailurePoint) -> StorageResult<()> {
        match self.failures.get(point) {
            Some(msg) => Err(StorageError::message(msg.clone())),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    buckets: HashMap<String, BucketState>,
    next_version: u64,
}

impl StoreState {
    fn next_version_id(&mut self) -> String {
        self.next_version += 1;
        format!("v{:06}", self.next_version)
    }

    fn bucket(&self, name: &str) -> StorageResult<&BucketState> {
        self.buckets
            .get(name)
            .ok_or_else(|| StorageError::message(format!("NoSuchBucket: {name}")))
    }

    fn bucket_mut(&mut self, name: &str) -> StorageResult<&mut BucketState> {
        self.buckets
            .get_mut(name)
            .ok_or_else(|| StorageError::message(format!("NoSuchBucket: {name}")))
    }
}

/// Shared in-memory store holding any number of versioned buckets
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create an empty bucket, or get a handle to an existing one
    pub fn bucket<N, R>(&self, name: N, region: R) -> MemoryBucket
    where
        N: Into<String>,
        R: Into<String>,
    {
        let name = name.into();
        let region = self
            .lock()
            .buckets
            .entry(name.clone())
            .or_insert_with(|| BucketState {
                region: region.into(),
                ..BucketState::default()
            })
            .region
            .clone();

        MemoryBucket {
            store: self.clone(),
            name,
            region,
        }
    }
}

/// A [`Bucket`] view over one bucket of a [`MemoryObjectStore`]
#[derive(Debug, Clone)]
pub struct MemoryBucket {
    store: MemoryObjectStore,
    name: String,
    region: String,
}

impl MemoryBucket {
    /// Write a new version of `key`, returning its version id
    pub fn put(&self, key: &str, content: impl Into<Vec<u8>>) -> StorageResult<String> {
        let mut state = self.store.lock();
        let id = state.next_version_id();
        state
            .bucket_mut(&self.name)?
            .objects
            .entry(key.to_string())
            .or_default()
            .push(StoredVersion {
                id: id.clone(),
                content: Some(content.into()),
            });
        Ok(id)
    }

    /// Hide `key` behind a delete marker
    pub fn delete(&self, key: &str) -> StorageResult<()> {
        let mut state = self.store.lock();
        let id = state.next_version_id();
        let bucket = state.bucket_mut(&self.name)?;
        if bucket.live(key).is_some() {
            bucket
                .objects
                .entry(key.to_string())
                .or_default()
                .push(StoredVersion { id, content: None });
        }
        Ok(())
    }

    /// Content of the live version of `key`
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let state = self.store.lock();
        state
            .bucket(&self.name)
            .ok()
            .and_then(|bucket| bucket.live(key))
            .and_then(|v| v.content.clone())
    }

    /// Keys with a live version, sorted
    ///
    /// Reads the stored state directly, so injected failures do not apply.
    /// A bucket the store does not hold has no keys.
    pub fn keys(&self) -> Vec<String> {
        let state = self.store.lock();
        state
            .bucket(&self.name)
            .map(|bucket| {
                bucket
                    .objects
                    .keys()
                    .filter(|key| bucket.live(key).is_some())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Make the given operation fail with `message` until cleared
    pub fn fail_on(&self, point: FailurePoint, message: impl Into<String>) {
        if let Ok(bucket) = self.store.lock().bucket_mut(&self.name) {
            bucket.failures.insert(point, message.into());
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(bucket) = self.store.lock().bucket_mut(&self.name) {
            bucket.failures.clear();
        }
    }
}

impl ObjectOperations for MemoryBucket {
    fn bucket_name(&self) -> &str {
        &self.name
    }

    fn copy_version(
        &self,
        _source_region: &str,
        source_bucket: &str,
        version: &LatestVersion,
    ) -> StorageResult<()> {
        let mut state = self.store.lock();
        state
            .bucket(&self.name)?
            .check(&FailurePoint::Copy(version.blob_key.clone()))?;

        let content = state
            .bucket(source_bucket)?
            .objects
            .get(&version.blob_key)
            .and_then(|history| history.iter().find(|v| v.id == version.id))
            .and_then(|v| v.content.clone())
            .ok_or_else(|| {
                StorageError::message(format!(
                    "NoSuchVersion: {}/{}?versionId={}",
                    source_bucket, version.blob_key, version.id
                ))
            })?;

        let id = state.next_version_id();
        state
            .bucket_mut(&self.name)?
            .objects
            .entry(version.blob_key.clone())
            .or_default()
            .push(StoredVersion {
                id,
                content: Some(content),
            });
        Ok(())
    }

    fn list_live_keys(&self) -> StorageResult<Vec<String>> {
        let state = self.store.lock();
        let bucket = state.bucket(&self.name)?;
        bucket.check(&FailurePoint::ListLiveKeys)?;
        Ok(bucket
            .objects
            .keys()
            .filter(|key| bucket.live(key).is_some())
            .cloned()
            .collect())
    }

    fn delete_object(&self, key: &str) -> StorageResult<()> {
        self.store
            .lock()
            .bucket(&self.name)?
            .check(&FailurePoint::Delete(key.to_string()))?;
        self.delete(key)
    }
}

impl Bucket for MemoryBucket {
    fn name(&self) -> &str {
        &self.name
    }

    fn region_name(&self) -> &str {
        &self.region
    }

    fn versions(&self) -> StorageResult<Vec<Version>> {
        let state = self.store.lock();
        let bucket = state.bucket(&self.name)?;
        bucket.check(&FailurePoint::ListVersions)?;

        let mut versions = Vec::new();
        for (key, history) in &bucket.objects {
            let latest = history.len() - 1;
            // newest first, like a service listing
            for (index, stored) in history.iter().enumerate().rev() {
                if !stored.is_delete_marker() {
                    versions.push(Version::new(key.clone(), stored.id.clone(), index == latest));
                }
            }
        }
        Ok(versions)
    }

    fn reconcile(
        &self,
        source_region: &str,
        source_bucket: &str,
        versions: &[LatestVersion],
    ) -> StorageResult<ReconcileReport> {
        reconcile::reconcile(self, source_region, source_bucket, versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::latest_versions;

    #[test]
    fn test_put_creates_new_latest_version() {
        let store = MemoryObjectStore::new();
        let bucket = store.bucket("droplets", "eu-west-1");

        let first = bucket.put("one", "v1").unwrap();
        let second = bucket.put("one", "v2").unwrap();

        let versions = bucket.versions().unwrap();
        assert_eq!(
            versions,
            vec![
                Version::new("one", second.clone(), true),
                Version::new("one", first, false)
            ]
        );
        assert_eq!(bucket.get("one"), Some(b"v2".to_vec()));
        assert_eq!(latest_versions(&versions), vec![LatestVersion::new("one", second)]);
    }

    #[test]
    fn test_delete_keeps_history_without_latest() {
        let store = MemoryObjectStore::new();
        let bucket = store.bucket("droplets", "eu-west-1");
        bucket.put("one", "v1").unwrap();
        bucket.delete("one").unwrap();

        let versions = bucket.versions().unwrap();
        assert_eq!(versions.len(), 1);
        assert!(!versions[0].is_latest);
        assert!(bucket.keys().is_empty());
        assert_eq!(bucket.get("one"), None);
    }

    #[test]
    fn test_copy_between_buckets() {
        let store = MemoryObjectStore::new();
        let source = store.bucket("source", "eu-west-1");
        let target = store.bucket("clone", "us-east-1");
        let id = source.put("one", "FILE1").unwrap();
        source.put("one", "FILE1_NEW").unwrap();

        target
            .copy_version("eu-west-1", "source", &LatestVersion::new("one", id))
            .unwrap();

        assert_eq!(target.get("one"), Some(b"FILE1".to_vec()));
        assert_eq!(source.get("one"), Some(b"FILE1_NEW".to_vec()));
    }

    #[test]
    fn test_copy_of_unknown_version_fails() {
        let store = MemoryObjectStore::new();
        store.bucket("source", "r");
        let target = store.bucket("target", "r");

        let err = target
            .copy_version("r", "source", &LatestVersion::new("one", "nope"))
            .unwrap_err();
        assert!(err.to_string().contains("NoSuchVersion"));
    }

    #[test]
    fn test_injected_failure() {
        let store = MemoryObjectStore::new();
        let bucket = store.bucket("b", "r");
        bucket.fail_on(FailurePoint::ListVersions, "Access Denied");

        assert_eq!(bucket.versions().unwrap_err().to_string(), "Access Denied");

        bucket.clear_failures();
        assert!(bucket.versions().is_ok());
    }

    #[test]
    fn test_keys_ignore_injected_listing_failure() {
        let store = MemoryObjectStore::new();
        let bucket = store.bucket("b", "r");
        bucket.put("one", "x").unwrap();
        bucket.fail_on(FailurePoint::ListLiveKeys, "Access Denied");

        assert_eq!(bucket.list_live_keys().unwrap_err().to_string(), "Access Denied");
        assert_eq!(bucket.keys(), vec!["one".to_string()]);
    }

    #[test]
    fn test_handles_share_state() {
        let store = MemoryObjectStore::new();
        store.bucket("b", "r").put("k", "x").unwrap();

        assert_eq!(store.bucket("b", "r").keys(), vec!["k".to_string()]);
    }
}
