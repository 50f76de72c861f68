//! Bucket configuration file
//!
//! The configuration is a JSON object mapping each bucket identifier to the
//! physical bucket it currently points at:
//!
//! ```json
//! {
//!   "droplets": {
//!     "name": "my-droplets-bucket",
//!     "region": "eu-west-1",
//!     "aws_access_key_id": "AKIA...",
//!     "aws_secret_access_key": "..."
//!   }
//! }
//! ```
//!
//! Identifiers are the join key between a backup and a later restore, so a
//! restore into a clone keeps the identifiers and only changes names/regions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::{BlobstoreError, Result};

/// Connection settings for one bucket
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Physical bucket name
    pub name: String,
    /// Bucket region
    pub region: String,
    /// Static access key id (falls back to the default credential chain when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_access_key_id: Option<String>,
    /// Static secret access key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_secret_access_key: Option<String>,
    /// Custom endpoint for S3-compatible stores (MinIO, LocalStack, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Use path-style addressing, usually required with a custom endpoint
    #[serde(default)]
    pub force_path_style: bool,
}

impl BucketConfig {
    /// Create a configuration using the default credential chain
    pub fn new<N: Into<String>, R: Into<String>>(name: N, region: R) -> Self {
        BucketConfig {
            name: name.into(),
            region: region.into(),
            aws_access_key_id: None,
            aws_secret_access_key: None,
            endpoint: None,
            force_path_style: false,
        }
    }

    /// Use static credentials
    pub fn with_access_key<I: Into<String>, S: Into<String>>(mut self, id: I, secret: S) -> Self {
        self.aws_access_key_id = Some(id.into());
        self.aws_secret_access_key = Some(secret.into());
        self
    }

    /// Point at an S3-compatible endpoint with path-style addressing
    pub fn with_endpoint<E: Into<String>>(mut self, endpoint: E) -> Self {
        self.endpoint = Some(endpoint.into());
        self.force_path_style = true;
        self
    }

    /// Static credentials, when both halves are configured
    pub fn access_key(&self) -> Option<(&str, &str)> {
        match (&self.aws_access_key_id, &self.aws_secret_access_key) {
            (Some(id), Some(secret)) => Some((id.as_str(), secret.as_str())),
            _ => None,
        }
    }

    fn validate(&self, identifier: &str) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BlobstoreError::validation(format!(
                "bucket '{identifier}' requires a non-empty name"
            )));
        }
        if self.region.trim().is_empty() {
            return Err(BlobstoreError::validation(format!(
                "bucket '{identifier}' requires a non-empty region"
            )));
        }
        if self.aws_access_key_id.is_some() != self.aws_secret_access_key.is_some() {
            return Err(BlobstoreError::validation(format!(
                "bucket '{identifier}' must set both aws_access_key_id and aws_secret_access_key, or neither"
            )));
        }
        Ok(())
    }
}

// Keep secrets out of logs
impl fmt::Debug for BucketConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketConfig")
            .field("name", &self.name)
            .field("region", &self.region)
            .field("aws_access_key_id", &self.aws_access_key_id)
            .field(
                "aws_secret_access_key",
                &self.aws_secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("endpoint", &self.endpoint)
            .field("force_path_style", &self.force_path_style)
            .finish()
    }
}

/// Identifier -> bucket mapping loaded from the configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketsConfig {
    pub buckets: BTreeMap<String, BucketConfig>,
}

impl BucketsConfig {
    /// Parse and validate a configuration document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: BucketsConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            BlobstoreError::validation(format!(
                "Failed to read config {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&json)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.buckets.is_empty() {
            return Err(BlobstoreError::validation(
                "configuration must define at least one bucket",
            ));
        }
        for (identifier, bucket) in &self.buckets {
            if identifier.trim().is_empty() {
                return Err(BlobstoreError::validation(
                    "bucket identifiers must not be empty",
                ));
            }
            bucket.validate(identifier)?;
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BucketConfig)> {
        self.buckets.iter()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
