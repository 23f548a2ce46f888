//! Metrics module
//!
//! Prometheus metrics for uploads, deletions, sniffing and transforms.
//! Everything registers with the default registry; [`gather`] renders it in
//! the text exposition format for whatever surface the host exposes.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_histogram_vec, Counter,
    CounterVec, Encoder, Histogram, HistogramVec, TextEncoder,
};

lazy_static! {
    // Upload metrics
    pub static ref UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "mizuchi_engine_uploads_total",
        "Total number of stored objects",
        &["bucket", "status"]
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "mizuchi_engine_upload_bytes_total",
        "Total bytes stored"
    ).unwrap();

    pub static ref UPLOAD_DURATION: HistogramVec = register_histogram_vec!(
        "mizuchi_engine_upload_duration_seconds",
        "Upload duration in seconds",
        &["bucket", "method"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 60.0]
    ).unwrap();

    // Multipart metrics
    pub static ref MULTIPART_UPLOADS: CounterVec = register_counter_vec!(
        "mizuchi_engine_multipart_uploads_total",
        "Total multipart uploads",
        &["bucket", "status"]
    ).unwrap();

    pub static ref MULTIPART_PARTS: Histogram = register_histogram!(
        "mizuchi_engine_multipart_parts",
        "Number of parts per multipart upload",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0]
    ).unwrap();

    // Deletion metrics
    pub static ref DELETES_TOTAL: CounterVec = register_counter_vec!(
        "mizuchi_engine_deletes_total",
        "Total object deletions",
        &["bucket", "status"]
    ).unwrap();

    // Sniffing metrics
    pub static ref SNIFFED_TYPES: CounterVec = register_counter_vec!(
        "mizuchi_engine_sniffed_content_types_total",
        "Content types detected by sniffing",
        &["mime"]
    ).unwrap();

    // Transform metrics
    pub static ref TRANSFORM_UPLOADS: CounterVec = register_counter_vec!(
        "mizuchi_engine_transform_uploads_total",
        "Transform outputs stored",
        &["transform", "status"]
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "mizuchi_engine_errors_total",
        "Total errors",
        &["type"]
    ).unwrap();
}

/// Record a stored object
pub fn record_upload_success(bucket: &str, bytes: u64) {
    UPLOADS_TOTAL.with_label_values(&[bucket, "success"]).inc();
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
}

/// Record a failed upload
pub fn record_upload_failure(bucket: &str) {
    UPLOADS_TOTAL.with_label_values(&[bucket, "failure"]).inc();
}

/// Record upload duration
pub fn record_upload_duration(bucket: &str, method: &str, duration_secs: f64) {
    UPLOAD_DURATION
        .with_label_values(&[bucket, method])
        .observe(duration_secs);
}

/// Record a successful multipart upload
pub fn record_multipart_upload_success(bucket: &str, parts_count: usize) {
    MULTIPART_UPLOADS
        .with_label_values(&[bucket, "success"])
        .inc();
    MULTIPART_PARTS.observe(parts_count as f64);
}

/// Record a failed multipart upload
pub fn record_multipart_upload_failure(bucket: &str) {
    MULTIPART_UPLOADS
        .with_label_values(&[bucket, "failure"])
        .inc();
}

pub fn record_delete(bucket: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    DELETES_TOTAL.with_label_values(&[bucket, status]).inc();
}

pub fn record_sniffed_type(mime: &str) {
    SNIFFED_TYPES.with_label_values(&[mime]).inc();
}

pub fn record_transform_upload(transform: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    TRANSFORM_UPLOADS
        .with_label_values(&[transform, status])
        .inc();
}

/// Record an error
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Render every registered metric in the Prometheus text format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}
