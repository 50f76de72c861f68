/*!
Object versions and the backup record schema.

The serialized field names of [`BucketBackup`] and [`LatestVersion`] are part
of the artifact format and must not change between releases, otherwise older
artifacts can no longer be restored.
*/

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mapping from caller-assigned bucket identifier to its captured state.
///
/// A `BTreeMap` keeps iteration (and therefore restore order and the
/// serialized artifact) deterministic.
pub type BackupArtifact = BTreeMap<String, BucketBackup>;

/// One historical object version as reported by the storage service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    /// Object key
    pub key: String,
    /// Opaque version identifier
    pub id: String,
    /// Whether the service reports this version as the live one
    pub is_latest: bool,
}

impl Version {
    pub fn new<K, I>(key: K, id: I, is_latest: bool) -> Self
    where
        K: Into<String>,
        I: Into<String>,
    {
        Self {
            key: key.into(),
            id: id.into(),
            is_latest,
        }
    }
}

/// The version selected to represent a key at backup time
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct LatestVersion {
    #[serde(rename = "BlobKey")]
    pub blob_key: String,
    #[serde(rename = "Id")]
    pub id: String,
}

impl LatestVersion {
    pub fn new<K, I>(blob_key: K, id: I) -> Self
    where
        K: Into<String>,
        I: Into<String>,
    {
        Self {
            blob_key: blob_key.into(),
            id: id.into(),
        }
    }
}

impl From<&Version> for LatestVersion {
    fn from(version: &Version) -> Self {
        Self::new(version.key.clone(), version.id.clone())
    }
}

/// Captured state of one bucket
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BucketBackup {
    /// Name of the bucket the versions were captured from
    #[serde(rename = "BucketName")]
    pub bucket_name: String,

    /// Region of the bucket the versions were captured from
    #[serde(rename = "RegionName")]
    pub region_name: String,

    /// Live version of every key, in listing order
    #[serde(rename = "Versions")]
    pub versions: Vec<LatestVersion>,
}

impl BucketBackup {
    pub fn new<B, R>(bucket_name: B, region_name: R, versions: Vec<LatestVersion>) -> Self
    where
        B: Into<String>,
        R: Into<String>,
    {
        Self {
            bucket_name: bucket_name.into(),
            region_name: region_name.into(),
            versions,
        }
    }

    /// Number of objects captured
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Captured object keys, in listing order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.versions.iter().map(|v| v.blob_key.as_str())
    }
}

/// Select the live version of every key from a version listing.
///
/// Only records flagged `is_latest` are kept, so a key whose live state is a
/// delete marker has no entry. Listing order is preserved, and a key is never
/// emitted twice even if the listing is inconsistent.
pub fn latest_versions(versions: &[Version]) -> Vec<LatestVersion> {
    let mut seen = std::collections::HashSet::new();
    versions
        .iter()
        .filter(|v| v.is_latest)
        .filter(|v| seen.insert(v.key.as_str()))
        .map(LatestVersion::from)
        .collect()
}
