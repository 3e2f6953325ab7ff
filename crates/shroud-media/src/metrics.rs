//! Pipeline metrics collection.
//!
//! Provides standardized metrics for monitoring the privacy pipeline:
//! - Detector latency and failure counters
//! - Model registry loads, evictions and cache hits
//! - Anonymization outcomes by status

use std::collections::BTreeMap;

use metrics::{counter, gauge, histogram};
use shroud_models::{AnonymizationStatus, DetectorType, RegionType};

use crate::registry::ExecutionBackend;

// =============================================================================
// Metric Names
// =============================================================================

/// Metric name constants for consistency.
pub mod names {
    /// Detector inference latency in seconds by detector.
    pub const DETECTOR_LATENCY_SECONDS: &str = "shroud_detector_latency_seconds";

    /// Detector runs that produced no result, by detector and reason.
    pub const DETECTOR_FAILURES_TOTAL: &str = "shroud_detector_failures_total";

    /// Model sessions loaded by detector and backend.
    pub const MODEL_LOADS_TOTAL: &str = "shroud_model_loads_total";

    /// Model load latency in seconds by detector.
    pub const MODEL_LOAD_SECONDS: &str = "shroud_model_load_seconds";

    /// Sessions evicted from the registry cache.
    pub const MODEL_EVICTIONS_TOTAL: &str = "shroud_model_evictions_total";

    /// Cached sessions handed out without a load.
    pub const MODEL_CACHE_HITS_TOTAL: &str = "shroud_model_cache_hits_total";

    /// Sessions currently resident in the registry.
    pub const MODEL_SESSIONS_RESIDENT: &str = "shroud_model_sessions_resident";

    /// Completed pipeline runs by status.
    pub const ANONYMIZATIONS_TOTAL: &str = "shroud_anonymizations_total";

    /// End-to-end pipeline latency in seconds.
    pub const PIPELINE_LATENCY_SECONDS: &str = "shroud_pipeline_latency_seconds";

    /// Regions redacted after merging, by region type.
    pub const REGIONS_REDACTED_TOTAL: &str = "shroud_regions_redacted_total";
}

// =============================================================================
// Recording Functions
// =============================================================================

/// Record a successful detector run.
pub fn record_detector_run(detector: DetectorType, latency_ms: f64) {
    histogram!(
        names::DETECTOR_LATENCY_SECONDS,
        "detector" => detector.as_str()
    )
    .record(latency_ms / 1000.0);
}

/// Record a detector that was skipped for this image.
pub fn record_detector_failure(detector: DetectorType, reason: &'static str) {
    counter!(
        names::DETECTOR_FAILURES_TOTAL,
        "detector" => detector.as_str(),
        "reason" => reason
    )
    .increment(1);
}

/// Record a model session load.
pub fn record_model_load(detector: DetectorType, backend: ExecutionBackend, latency_ms: f64) {
    counter!(
        names::MODEL_LOADS_TOTAL,
        "detector" => detector.as_str(),
        "backend" => backend.as_str()
    )
    .increment(1);

    histogram!(
        names::MODEL_LOAD_SECONDS,
        "detector" => detector.as_str()
    )
    .record(latency_ms / 1000.0);
}

/// Record evicted sessions.
pub fn record_evictions(count: usize) {
    counter!(names::MODEL_EVICTIONS_TOTAL).increment(count as u64);
}

/// Record a registry cache hit.
pub fn record_cache_hit(detector: DetectorType) {
    counter!(
        names::MODEL_CACHE_HITS_TOTAL,
        "detector" => detector.as_str()
    )
    .increment(1);
}

/// Record the number of resident sessions.
pub fn record_resident_sessions(count: usize) {
    gauge!(names::MODEL_SESSIONS_RESIDENT).set(count as f64);
}

/// Record a finished pipeline run.
pub fn record_anonymization(
    status: AnonymizationStatus,
    by_type: &BTreeMap<RegionType, usize>,
    latency_ms: f64,
) {
    counter!(
        names::ANONYMIZATIONS_TOTAL,
        "status" => status.as_str()
    )
    .increment(1);

    for (region_type, count) in by_type {
        counter!(
            names::REGIONS_REDACTED_TOTAL,
            "region_type" => region_type.as_str()
        )
        .increment(*count as u64);
    }

    histogram!(names::PIPELINE_LATENCY_SECONDS).record(latency_ms / 1000.0);
}

// =============================================================================
// Tests
// =============================================================================
