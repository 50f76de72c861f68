/*!
Amazon S3 bucket implementation.

This module drives a versioned S3 bucket (or any S3-compatible store) through
the official AWS SDK: listing object versions, copying specific versions
between buckets, listing live keys and deleting objects.
*/

use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::Client as S3Client;
use blobstore_retry::{
    permanent_error, transient_error, with_policy, BoxFuture, RetryError, RetryPolicy,
};
use std::future::Future;
use tracing::{debug, error, info};

use super::{runtime, Bucket};
use crate::config::BucketConfig;
use crate::error::{StorageError, StorageResult};
use crate::reconcile::{self, ObjectOperations, ReconcileReport};
use crate::version::{LatestVersion, Version};
use crate::{BlobstoreError, Result};

#[cfg(feature = "metrics")]
use crate::observability::MetricsTimer;

/// A versioned S3 bucket
///
/// # Authentication
/// Static credentials from the bucket configuration take precedence.
/// Otherwise the standard AWS credential provider chain is used:
/// 1. Environment variables (AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, AWS_SESSION_TOKEN)
/// 2. AWS credentials file (~/.aws/credentials)
/// 3. IAM roles for EC2 instances / ECS task roles
///
/// # Example
/// ```rust,no_run
/// use blobstore_core::{Bucket, BucketConfig, S3Bucket};
///
/// let config = BucketConfig::new("my-droplets", "eu-west-1");
/// let bucket = S3Bucket::from_config(&config)?;
/// let versions = bucket.versions()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct S3Bucket {
    client: S3Client,
    name: String,
    region: String,
    retry: RetryPolicy,
}

impl S3Bucket {
    /// Connect to a bucket described by a configuration entry
    ///
    /// Credentials are resolved lazily by the SDK, so missing credentials
    /// surface as the error of the first storage call.
    ///
    /// # Errors
    /// Returns an error if the async runtime cannot be created.
    pub fn from_config(config: &BucketConfig) -> Result<Self> {
        let rt = runtime().map_err(|e| BlobstoreError::validation(e.to_string()))?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let Some((id, secret)) = config.access_key() {
            loader = loader.credentials_provider(Credentials::new(
                id,
                secret,
                None,
                None,
                "blobstore-config",
            ));
        }

        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = rt.block_on(loader.load());

        let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config);
        if config.force_path_style {
            s3_config = s3_config.force_path_style(true);
        }

        info!(bucket = %config.name, region = %config.region, "Initialized S3 bucket");

        Ok(Self {
            client: S3Client::from_conf(s3_config.build()),
            name: config.name.clone(),
            region: config.region.clone(),
            retry: RetryPolicy::default(),
        })
    }

    /// Run one SDK operation on the shared runtime, retrying transient failures
    fn run<T, F, Fut>(&self, op: &'static str, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: Fn(S3Client) -> Fut,
        Fut: Future<Output = std::result::Result<T, RetryError>> + Send + 'static,
    {
        #[cfg(feature = "metrics")]
        let timer = MetricsTimer::start(op);

        let client = self.client.clone();
        let result = runtime()?.block_on(with_policy(
            op,
            self.retry.clone(),
            |attempt| -> BoxFuture<'static, T> {
                if attempt > 1 {
                    debug!(bucket = %self.name, operation = op, attempt, "Retrying S3 operation");
                    #[cfg(feature = "metrics")]
                    timer.record_retry();
                }
                Box::pin(f(client.clone()))
            },
        ));

        match result {
            Ok(value) => {
                #[cfg(feature = "metrics")]
                timer.finish();
                Ok(value)
            }
            Err(e) => {
                #[cfg(feature = "metrics")]
                timer.finish_with_error();
                let err = into_storage_error(e);
                error!(bucket = %self.name, operation = op, error = %err, "S3 operation failed");
                Err(err)
            }
        }
    }
}

impl ObjectOperations for S3Bucket {
    fn bucket_name(&self) -> &str {
        &self.name
    }

    fn copy_version(
        &self,
        source_region: &str,
        source_bucket: &str,
        version: &LatestVersion,
    ) -> StorageResult<()> {
        let bucket = self.name.clone();
        let key = version.blob_key.clone();
        let copy_source = copy_source(source_bucket, &version.blob_key, &version.id);

        debug!(
            bucket = %self.name,
            source_region = %source_region,
            copy_source = %copy_source,
            "Starting S3 copy_object operation"
        );

        self.run("copy_object", move |client| {
            let (bucket, key, copy_source) = (bucket.clone(), key.clone(), copy_source.clone());
            async move {
                client
                    .copy_object()
                    .bucket(&bucket)
                    .key(&key)
                    .copy_source(&copy_source)
                    .send()
                    .await
                    .map_err(|e| retry_error("copy_object", e, &copy_source))?;
                Ok(())
            }
        })
    }

    fn list_live_keys(&self) -> StorageResult<Vec<String>> {
        let bucket = self.name.clone();

        self.run("list_objects_v2", move |client| {
            let bucket = bucket.clone();
            async move {
                let mut keys = Vec::new();
                let mut continuation_token: Option<String> = None;

                loop {
                    let output = client
                        .list_objects_v2()
                        .bucket(&bucket)
                        .set_continuation_token(continuation_token.take())
                        .send()
                        .await
                        .map_err(|e| retry_error("list_objects_v2", e, &bucket))?;

                    keys.extend(
                        output
                            .contents()
                            .iter()
                            .filter_map(|object| object.key())
                            .map(str::to_string),
                    );

                    match output.next_continuation_token() {
                        Some(token) if output.is_truncated().unwrap_or(false) => {
                            continuation_token = Some(token.to_string());
                        }
                        _ => break,
                    }
                }

                Ok(keys)
            }
        })
    }

    fn delete_object(&self, key: &str) -> StorageResult<()> {
        let bucket = self.name.clone();
        let key = key.to_string();

        self.run("delete_object", move |client| {
            let (bucket, key) = (bucket.clone(), key.clone());
            async move {
                client
                    .delete_object()
                    .bucket(&bucket)
                    .key(&key)
                    .send()
                    .await
                    .map_err(|e| retry_error("delete_object", e, &format!("{bucket}/{key}")))?;
                Ok(())
            }
        })
    }
}

impl Bucket for S3Bucket {
    fn name(&self) -> &str {
        &self.name
    }

    fn region_name(&self) -> &str {
        &self.region
    }

    fn versions(&self) -> StorageResult<Vec<Version>> {
        let bucket = self.name.clone();

        let versions = self.run("list_object_versions", move |client| {
            let bucket = bucket.clone();
            async move {
                let mut versions = Vec::new();
                let mut key_marker: Option<String> = None;
                let mut version_id_marker: Option<String> = None;

                loop {
                    let output = client
                        .list_object_versions()
                        .bucket(&bucket)
                        .set_key_marker(key_marker.take())
                        .set_version_id_marker(version_id_marker.take())
                        .send()
                        .await
                        .map_err(|e| retry_error("list_object_versions", e, &bucket))?;

                    for version in output.versions() {
                        if let (Some(key), Some(id)) = (version.key(), version.version_id()) {
                            versions.push(Version::new(
                                key,
                                id,
                                version.is_latest().unwrap_or(false),
                            ));
                        }
                    }

                    if !output.is_truncated().unwrap_or(false) {
                        break;
                    }
                    key_marker = output.next_key_marker().map(str::to_string);
                    version_id_marker = output.next_version_id_marker().map(str::to_string);
                    if key_marker.is_none() {
                        break;
                    }
                }

                Ok(versions)
            }
        })?;

        #[cfg(feature = "metrics")]
        crate::observability::BlobstoreMetrics::global().record_versions_listed(versions.len());

        debug!(bucket = %self.name, count = versions.len(), "Listed object versions");
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

/// `CopySource` value addressing one version of a key: `bucket/key?versionId=id`
///
/// Each path segment of the key is percent-encoded; the separators are kept.
pub fn copy_source(bucket: &str, key: &str, version_id: &str) -> String {
    let encoded_key = key
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
    format!(
        "{bucket}/{encoded_key}?versionId={}",
        urlencoding::encode(version_id)
    )
}

fn into_storage_error(error: RetryError) -> StorageError {
    match error.into_source().downcast::<StorageError>() {
        Ok(storage) => *storage,
        Err(other) => StorageError::message(other.to_string()),
    }
}

fn retry_error<E>(op: &'static str, error: SdkError<E>, target: &str) -> RetryError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let (err, transient) = map_s3_error(op, &error, target);
    if transient {
        transient_error!(op, err)
    } else {
        permanent_error!(op, err)
    }
}

/// Map an AWS SDK error to a storage error, and whether retrying may help
fn map_s3_error<E>(op: &str, error: &SdkError<E>, target: &str) -> (StorageError, bool)
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match error {
        SdkError::DispatchFailure(dispatch_err) => (
            StorageError::message(format!(
                "S3 {op} request failed to dispatch ({target}): {dispatch_err:?}"
            )),
            true,
        ),
        SdkError::TimeoutError(_) => (
            StorageError::message(format!("S3 {op} request timed out ({target})")),
            true,
        ),
        SdkError::ResponseError(response_err) => (
            StorageError::message(format!(
                "S3 {op} response error ({target}): {response_err:?}"
            )),
            true,
        ),
        SdkError::ServiceError(service_err) => {
            let status = service_err.raw().status().as_u16();
            let err = service_err.err();
            let code = err.code().unwrap_or("Unknown");
            let message = err.message().unwrap_or("no error message");
            let transient = status >= 500
                || matches!(
                    code,
                    "InternalError" | "ServiceUnavailable" | "SlowDown" | "RequestTimeout" | "Throttling"
                );
            (
                StorageError::message(format!(
                    "S3 {op} failed ({target}): {code} (HTTP {status}): {message}"
                )),
                transient,
            )
        }
        _ => (
            StorageError::message(format!("S3 {op} error ({target}): {error}")),
            false,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::operation::delete_object::DeleteObjectError;

    #[test]
    fn test_copy_source_encodes_key_segments() {
        assert_eq!(
            copy_source("my-bucket", "cc-droplets/ab/cd/file name+1", "3HL4kqtJ"),
            "my-bucket/cc-droplets/ab/cd/file%20name%2B1?versionId=3HL4kqtJ"
        );
    }

    #[test]
    fn test_copy_source_encodes_version_id() {
        assert_eq!(copy_source("b", "k", "a+b/c"), "b/k?versionId=a%2Bb%2Fc");
    }

    #[test]
    fn test_from_config_defers_credential_resolution() {
        let bucket = S3Bucket::from_config(&BucketConfig::new("my-droplets", "eu-west-1")).unwrap();
        assert_eq!(bucket.name(), "my-droplets");
        assert_eq!(bucket.region_name(), "eu-west-1");
        assert_eq!(bucket.retry.max_attempts, blobstore_retry::DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn test_from_config_with_static_keys_and_endpoint() {
        let config = BucketConfig::new("my-packages", "us-east-1")
            .with_access_key("AKIA", "secret")
            .with_endpoint("http://localhost:4566");
        let bucket = S3Bucket::from_config(&config).unwrap();
        assert_eq!(bucket.bucket_name(), "my-packages");
    }

    #[test]
    fn test_timeout_is_transient() {
        let error: SdkError<DeleteObjectError> = SdkError::timeout_error("connect timeout");
        let (mapped, transient) = map_s3_error("delete_object", &error, "bucket/key");

        assert!(transient);
        assert!(mapped.to_string().contains("timed out"));
        assert!(mapped.to_string().contains("bucket/key"));
    }

    #[test]
    fn test_construction_failure_is_permanent() {
        let error: SdkError<DeleteObjectError> = SdkError::construction_failure("missing key");
        let (mapped, transient) = map_s3_error("delete_object", &error, "bucket");

        assert!(!transient);
        assert!(mapped.to_string().starts_with("S3 delete_object error"));
    }

    #[test]
    fn test_retry_error_keeps_message_for_caller() {
        let error: SdkError<DeleteObjectError> = SdkError::construction_failure("missing key");
        let retry = retry_error("delete_object", error, "bucket");
        let expected = retry.to_string();

        let storage = into_storage_error(retry);
        assert!(expected.ends_with(&storage.to_string()));
        assert!(matches!(storage, StorageError::Message(_)));
    }
}
