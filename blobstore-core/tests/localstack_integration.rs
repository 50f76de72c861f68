/*!
LocalStack integration tests for the S3 bucket backend.

LocalStack should be running on localhost:4566 for these tests to work.

To run LocalStack:
```bash
docker run --rm -p 4566:4566 localstack/localstack
```

Then run tests with:
```bash
RUN_LOCALSTACK_TESTS=1 cargo test -p blobstore-core --features s3 localstack
```
*/

#![cfg(feature = "s3")]

use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketVersioningStatus, VersioningConfiguration};
use aws_sdk_s3::Client;
use blobstore_core::{
    init_default_observability, Backuper, Bucket, BucketConfig, MemoryArtifact, Restorer,
    S3Bucket,
};
use std::collections::BTreeMap;
use std::sync::Once;

const ENDPOINT: &str = "http://localhost:4566";
const REGION: &str = "us-east-1";

static INIT: Once = Once::new();

fn init_test_observability() {
    INIT.call_once(|| {
        let _ = init_default_observability();
    });
}

/// Check if LocalStack tests were requested
fn check_localstack_available() -> bool {
    std::env::var("RUN_LOCALSTACK_TESTS").unwrap_or_default() == "1"
}

fn bucket_config(name: &str) -> BucketConfig {
    BucketConfig::new(name, REGION)
        .with_access_key("test", "test")
        .with_endpoint(ENDPOINT)
}

/// Direct SDK access for arranging bucket contents
struct Fixture {
    rt: tokio::runtime::Runtime,
    client: Client,
}

impl Fixture {
    fn new() -> Self {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let sdk_config = rt.block_on(
            aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(REGION))
                .credentials_provider(Credentials::new("test", "test", None, None, "localstack"))
                .endpoint_url(ENDPOINT)
                .load(),
        );
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();
        Self {
            rt,
            client: Client::from_conf(s3_config),
        }
    }

    fn create_versioned_bucket(&self, name: &str) {
        self.rt.block_on(async {
            let _ = self.client.create_bucket().bucket(name).send().await;
            self.client
                .put_bucket_versioning()
                .bucket(name)
                .versioning_configuration(
                    VersioningConfiguration::builder()
                        .status(BucketVersioningStatus::Enabled)
                        .build(),
                )
                .send()
                .await
                .unwrap();
        });
    }

    fn put(&self, bucket: &str, key: &str, body: &str) {
        self.rt.block_on(async {
            self.client
                .put_object()
                .bucket(bucket)
                .key(key)
                .body(ByteStream::from(body.as_bytes().to_vec()))
                .send()
                .await
                .unwrap();
        });
    }

    fn delete(&self, bucket: &str, key: &str) {
        self.rt.block_on(async {
            self.client
                .delete_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .unwrap();
        });
    }

    fn get(&self, bucket: &str, key: &str) -> Option<String> {
        self.rt.block_on(async {
            let output = self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .ok()?;
            let bytes = output.body.collect().await.ok()?.into_bytes();
            Some(String::from_utf8_lossy(&bytes).into_owned())
        })
    }
}

#[test]
fn test_localstack_backup_and_restore_in_place() {
    if !check_localstack_available() {
        println!("Skipping LocalStack test - set RUN_LOCALSTACK_TESTS=1 and run LocalStack");
        return;
    }
    init_test_observability();

    let fixture = Fixture::new();
    let name = "blobstore-localstack-in-place";
    fixture.create_versioned_bucket(name);
    fixture.put(name, "one", "one-v1");
    fixture.put(name, "dir/with spaces+plus.txt", "nested-v1");

    let bucket = S3Bucket::from_config(&bucket_config(name)).unwrap();
    let artifact = MemoryArtifact::new();
    let backup = Backuper::new(BTreeMap::from([("droplets".to_string(), bucket.clone())]), artifact.clone())
        .backup()
        .unwrap();
    assert_eq!(backup["droplets"].len(), 2);
    assert_eq!(backup["droplets"].bucket_name, name);

    fixture.put(name, "one", "one-v2");
    fixture.delete(name, "dir/with spaces+plus.txt");
    fixture.put(name, "added", "added-v1");

    let summary = Restorer::new(BTreeMap::from([("droplets".to_string(), bucket.clone())]), artifact)
        .restore()
        .unwrap();

    assert_eq!(summary.objects_copied, 2);
    assert_eq!(summary.objects_deleted, 1);
    assert_eq!(fixture.get(name, "one").as_deref(), Some("one-v1"));
    assert_eq!(
        fixture.get(name, "dir/with spaces+plus.txt").as_deref(),
        Some("nested-v1")
    );
    assert_eq!(fixture.get(name, "added"), None);

    // Listing after the restore reports the restored copies as live
    let versions = bucket.versions().unwrap();
    assert_eq!(versions.iter().filter(|v| v.is_latest).count(), 2);
}

#[test]
fn test_localstack_restore_into_clone() {
    if !check_localstack_available() {
        println!("Skipping LocalStack test - set RUN_LOCALSTACK_TESTS=1 and run LocalStack");
        return;
    }
    init_test_observability();

    let fixture = Fixture::new();
    let source = "blobstore-localstack-source";
    let clone = "blobstore-localstack-clone";
    fixture.create_versioned_bucket(source);
    fixture.create_versioned_bucket(clone);
    fixture.put(source, "droplet", "d1");
    fixture.put(clone, "stale", "left over");

    let artifact = MemoryArtifact::new();
    Backuper::new(
        BTreeMap::from([(
            "droplets".to_string(),
            S3Bucket::from_config(&bucket_config(source)).unwrap(),
        )]),
        artifact.clone(),
    )
    .backup()
    .unwrap();

    Restorer::new(
        BTreeMap::from([(
            "droplets".to_string(),
            S3Bucket::from_config(&bucket_config(clone)).unwrap(),
        )]),
        artifact,
    )
    .restore()
    .unwrap();

    assert_eq!(fixture.get(clone, "droplet").as_deref(), Some("d1"));
    assert_eq!(fixture.get(clone, "stale"), None);
}

#[test]
fn test_localstack_missing_bucket_error_is_surfaced() {
    if !check_localstack_available() {
        println!("Skipping LocalStack test - set RUN_LOCALSTACK_TESTS=1 and run LocalStack");
        return;
    }
    init_test_observability();

    let bucket = S3Bucket::from_config(&bucket_config("blobstore-localstack-missing")).unwrap();
    let err = Backuper::new(BTreeMap::from([("droplets".to_string(), bucket)]), MemoryArtifact::new())
        .backup()
        .unwrap_err();

    assert_eq!(err.identifier(), Some("droplets"));
    assert!(!err.to_string().is_empty());
}
