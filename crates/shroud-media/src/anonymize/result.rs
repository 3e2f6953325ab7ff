//! Output of one anonymization run.

use std::collections::BTreeMap;
use std::time::Duration;

use image::RgbImage;
use shroud_models::{AnonymizationMetadata, AnonymizationStatus, DetectorType, RegionType};

use crate::detection::ProcessingContext;
use crate::error::{MediaError, MediaResult};

/// Redacted image and run summary.
///
/// `image` is `None` exactly when `status` is `Error`.
#[derive(Debug, Clone)]
pub struct AnonymizationResult {
    pub image: Option<RgbImage>,
    /// Regions redacted after merging.
    pub regions_processed: usize,
    pub by_type: BTreeMap<RegionType, usize>,
    pub elapsed: Duration,
    pub status: AnonymizationStatus,
    pub error: Option<String>,
    pub detectors_run: Vec<DetectorType>,
    pub detectors_absent: Vec<DetectorType>,
    /// Why each absent detector produced no result.
    pub absent_reasons: BTreeMap<DetectorType, String>,
}

impl AnonymizationResult {
    pub(crate) fn redacted(
        image: RgbImage,
        by_type: BTreeMap<RegionType, usize>,
        context: &ProcessingContext,
        elapsed: Duration,
    ) -> Self {
        let regions_processed = by_type.values().sum();
        let status = if regions_processed == 0 {
            AnonymizationStatus::NoRegions
        } else {
            AnonymizationStatus::Success
        };

        Self {
            image: Some(image),
            regions_processed,
            by_type,
            elapsed,
            status,
            error: None,
            detectors_run: context.detectors_run(),
            detectors_absent: context.detectors_absent(),
            absent_reasons: context.absent().clone(),
        }
    }

    /// A failed run. No image is carried.
    pub fn failed(error: impl ToString, elapsed: Duration) -> Self {
        Self {
            image: None,
            regions_processed: 0,
            by_type: BTreeMap::new(),
            elapsed,
            status: AnonymizationStatus::Error,
            error: Some(error.to_string()),
            detectors_run: Vec::new(),
            detectors_absent: Vec::new(),
            absent_reasons: BTreeMap::new(),
        }
    }

    pub(crate) fn with_detectors(mut self, context: &ProcessingContext) -> Self {
        self.detectors_run = context.detectors_run();
        self.detectors_absent = context.detectors_absent();
        self.absent_reasons = context.absent().clone();
        self
    }

    pub(crate) fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn is_transmittable(&self) -> bool {
        self.status.is_transmittable() && self.image.is_some()
    }

    /// The image if it may leave the device, `None` otherwise.
    pub fn into_transmittable(self) -> Option<RgbImage> {
        if self.status.is_transmittable() {
            self.image
        } else {
            None
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }

    pub fn metadata(&self) -> AnonymizationMetadata {
        AnonymizationMetadata {
            regions_processed: self.regions_processed,
            by_type: self
                .by_type
                .iter()
                .map(|(region_type, count)| (region_type.as_str().to_string(), *count))
                .collect(),
            elapsed_ms: self.elapsed_ms(),
            status: self.status,
            detectors_run: self.detectors_run.clone(),
            detectors_absent: self.detectors_absent.clone(),
            absent_reasons: self
                .absent_reasons
                .iter()
                .map(|(detector, reason)| (detector.as_str().to_string(), reason.clone()))
                .collect(),
            error: self.error.clone(),
        }
    }

    /// Metadata as pretty-printed JSON.
    pub fn metadata_json(&self) -> MediaResult<String> {
        serde_json::to_string_pretty(&self.metadata())
            .map_err(|e| MediaError::internal(format!("Failed to serialize metadata: {e}")))
    }
}
