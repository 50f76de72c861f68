/*!
Observability for backup and restore runs.

- Structured logging setup (`tracing` + `tracing-subscriber`, optional JSON)
- Prometheus metrics behind the `metrics` feature, rendered in the text
  exposition format so a run can drop them into a node-exporter textfile
*/

#[cfg(feature = "metrics")]
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
#[cfg(feature = "metrics")]
use std::time::Instant;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{BlobstoreError, Result};

/// Global metrics instance
#[cfg(feature = "metrics")]
static METRICS: OnceLock<BlobstoreMetrics> = OnceLock::new();

/// Metrics collected during backup and restore runs
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct BlobstoreMetrics {
    // Storage API calls, labelled by operation
    pub storage_requests_total: IntCounterVec,
    pub storage_errors_total: IntCounterVec,
    pub storage_retries_total: IntCounterVec,
    pub storage_latency_seconds: HistogramVec,

    // Backup/restore progress
    pub versions_listed_total: IntCounter,
    pub objects_copied_total: IntCounter,
    pub objects_deleted_total: IntCounter,
    pub buckets_backed_up_total: IntCounter,
    pub buckets_restored_total: IntCounter,

    registry: Registry,
}

#[cfg(feature = "metrics")]
fn metric_error(name: &str, e: prometheus::Error) -> BlobstoreError {
    BlobstoreError::validation(format!("Failed to create {name} metric: {e}"))
}

#[cfg(feature = "metrics")]
impl BlobstoreMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let counter_vec = |name: &str, help: &str| -> Result<IntCounterVec> {
            let metric = IntCounterVec::new(Opts::new(name, help), &["operation"])
                .map_err(|e| metric_error(name, e))?;
            registry
                .register(Box::new(metric.clone()))
                .map_err(|e| metric_error(name, e))?;
            Ok(metric)
        };
        let counter = |name: &str, help: &str| -> Result<IntCounter> {
            let metric = IntCounter::new(name, help).map_err(|e| metric_error(name, e))?;
            registry
                .register(Box::new(metric.clone()))
                .map_err(|e| metric_error(name, e))?;
            Ok(metric)
        };

        let storage_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "blobstore_storage_latency_seconds",
                "Duration of storage API operations in seconds",
            ),
            &["operation"],
        )
        .map_err(|e| metric_error("blobstore_storage_latency_seconds", e))?;
        registry
            .register(Box::new(storage_latency_seconds.clone()))
            .map_err(|e| metric_error("blobstore_storage_latency_seconds", e))?;

        Ok(Self {
            storage_requests_total: counter_vec(
                "blobstore_storage_requests_total",
                "Total storage API operations started",
            )?,
            storage_errors_total: counter_vec(
                "blobstore_storage_errors_total",
                "Total storage API operations that failed",
            )?,
            storage_retries_total: counter_vec(
                "blobstore_storage_retries_total",
                "Total storage API retry attempts",
            )?,
            storage_latency_seconds,
            versions_listed_total: counter(
                "blobstore_versions_listed_total",
                "Object versions returned by bucket listings",
            )?,
            objects_copied_total: counter(
                "blobstore_objects_copied_total",
                "Object versions copied while restoring",
            )?,
            objects_deleted_total: counter(
                "blobstore_objects_deleted_total",
                "Objects deleted while restoring",
            )?,
            buckets_backed_up_total: counter(
                "blobstore_buckets_backed_up_total",
                "Buckets captured into an artifact",
            )?,
            buckets_restored_total: counter(
                "blobstore_buckets_restored_total",
                "Buckets reconciled from an artifact",
            )?,
            registry,
        })
    }

    /// Get or initialize the global metrics instance
    pub fn global() -> &'static BlobstoreMetrics {
        METRICS.get_or_init(|| Self::new().expect("Failed to initialize blobstore metrics"))
    }

    pub fn record_storage_request(&self, operation: &str) {
        self.storage_requests_total
            .with_label_values(&[operation])
            .inc();
    }

    pub fn record_storage_error(&self, operation: &str) {
        self.storage_errors_total.with_label_values(&[operation]).inc();
    }

    pub fn record_storage_retry(&self, operation: &str) {
        self.storage_retries_total
            .with_label_values(&[operation])
            .inc();
    }

    pub fn record_storage_latency(&self, operation: &str, duration: std::time::Duration) {
        self.storage_latency_seconds
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    pub fn record_versions_listed(&self, count: usize) {
        self.versions_listed_total.inc_by(count as u64);
    }

    pub fn record_object_copied(&self) {
        self.objects_copied_total.inc();
    }

    pub fn record_object_deleted(&self) {
        self.objects_deleted_total.inc();
    }

    pub fn record_bucket_backed_up(&self) {
        self.buckets_backed_up_total.inc();
    }

    pub fn record_bucket_restored(&self) {
        self.buckets_restored_total.inc();
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| BlobstoreError::validation(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer).map_err(|e| {
            BlobstoreError::validation(format!("Failed to convert metrics to string: {e}"))
        })
    }
}

/// Times one storage operation and records its outcome
#[cfg(feature = "metrics")]
pub struct MetricsTimer {
    start: Instant,
    operation: &'static str,
}

#[cfg(feature = "metrics")]
impl MetricsTimer {
    pub fn start(operation: &'static str) -> Self {
        BlobstoreMetrics::global().record_storage_request(operation);
        Self {
            start: Instant::now(),
            operation,
        }
    }

    /// Record a retry of this operation
    pub fn record_retry(&self) {
        BlobstoreMetrics::global().record_storage_retry(self.operation);
    }

    pub fn finish(self) {
        BlobstoreMetrics::global().record_storage_latency(self.operation, self.start.elapsed());
    }

    pub fn finish_with_error(self) {
        let metrics = BlobstoreMetrics::global();
        metrics.record_storage_latency(self.operation, self.start.elapsed());
        metrics.record_storage_error(self.operation);
    }
}

/// Crates whose events follow the requested level when `RUST_LOG` is unset
const WORKSPACE_TARGETS: [&str; 3] = ["blobstore_core", "blobstore_cli", "blobstore_retry"];

/// Filter directives raising this workspace's crates to `level`
///
/// Everything else, the AWS SDK included, stays at `warn`.
fn default_directives(level: &str) -> String {
    WORKSPACE_TARGETS
        .iter()
        .fold(String::from("warn"), |mut directives, target| {
            directives.push_str(&format!(",{target}={level}"));
            directives
        })
}

/// Initialize the global tracing subscriber
///
/// `RUST_LOG` takes precedence; otherwise `default_level` applies to this
/// workspace's crates and other crates log at `warn`. With `json` set,
/// events are emitted as one JSON object per line.
pub fn init_observability(default_level: &str, json: bool) -> Result<()> {
    #[cfg(feature = "metrics")]
    BlobstoreMetrics::global();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(default_level)))
        .map_err(|e| BlobstoreError::validation(format!("Invalid log filter: {e}")))?;

    let registry = TracingRegistry::default().with(filter);

    let result = if json {
        set_global_default(
            registry.with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            ),
        )
    } else {
        set_global_default(
            registry.with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            ),
        )
    };

    result.map_err(|e| {
        BlobstoreError::validation(format!("Failed to set global tracing subscriber: {e}"))
    })
}

/// Initialize observability with default settings
pub fn init_default_observability() -> Result<()> {
    init_observability("info", false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_scope_level_to_workspace() {
        assert_eq!(
            default_directives("debug"),
            "warn,blobstore_core=debug,blobstore_cli=debug,blobstore_retry=debug"
        );
        assert!(EnvFilter::try_new(default_directives("info")).is_ok());
    }

    #[test]
    fn test_invalid_default_level_is_rejected() {
        assert!(EnvFilter::try_new(default_directives("loud")).is_err());
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_metrics_recording() {
        let metrics = BlobstoreMetrics::global();

        metrics.record_storage_request("copy_object");
        metrics.record_storage_error("copy_object");
        metrics.record_storage_latency("copy_object", std::time::Duration::from_millis(10));
        metrics.record_storage_retry("copy_object");
        metrics.record_versions_listed(3);
        metrics.record_object_copied();
        metrics.record_object_deleted();
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_metrics_timer() {
        let timer = MetricsTimer::start("list_objects_v2");
        timer.record_retry();
        timer.finish();

        MetricsTimer::start("delete_object").finish_with_error();
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_metrics_gathering() {
        let metrics = BlobstoreMetrics::global();
        metrics.record_storage_request("list_object_versions");
        metrics.record_bucket_backed_up();

        let text = metrics.gather_metrics().unwrap();
        assert!(text.contains("blobstore_storage_requests_total"));
        assert!(text.contains("blobstore_buckets_backed_up_total"));
    }
}
