//! Per-run detection results.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use image::RgbImage;
use shroud_models::{DetectionResult, DetectorType};

use crate::error::MediaError;

/// Image and detector outputs of one run.
///
/// A detector without an entry did not run or failed; `absent` keeps the
/// reason for diagnostics.
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    image: Arc<RgbImage>,
    results: HashMap<DetectorType, DetectionResult>,
    absent: BTreeMap<DetectorType, String>,
    configuration_error: Option<String>,
}

impl ProcessingContext {
    pub fn new(image: Arc<RgbImage>) -> Self {
        Self {
            image,
            results: HashMap::new(),
            absent: BTreeMap::new(),
            configuration_error: None,
        }
    }

    pub fn image(&self) -> &Arc<RgbImage> {
        &self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Store a detector result, clearing any recorded absence.
    pub fn insert(&mut self, detector: DetectorType, result: DetectionResult) {
        self.absent.remove(&detector);
        self.results.insert(detector, result);
    }

    /// Record that a detector produced no result.
    pub fn record_absent(&mut self, detector: DetectorType, reason: impl Into<String>) {
        self.results.remove(&detector);
        self.absent.insert(detector, reason.into());
    }

    /// Record a detector error as an absence. An exhausted model cache is
    /// also kept as a configuration problem the caller must see.
    pub fn record_failure(&mut self, detector: DetectorType, error: &MediaError) {
        if matches!(error, MediaError::RegistryCapacity { .. }) && self.configuration_error.is_none() {
            self.configuration_error = Some(format!("{detector}: {error}"));
        }
        self.record_absent(detector, error.to_string());
    }

    /// First configuration problem hit while detecting, if any.
    pub fn configuration_error(&self) -> Option<&str> {
        self.configuration_error.as_deref()
    }

    pub fn get(&self, detector: DetectorType) -> Option<&DetectionResult> {
        self.results.get(&detector)
    }

    pub fn contains(&self, detector: DetectorType) -> bool {
        self.results.contains_key(&detector)
    }

    /// Present results in detector order.
    pub fn results(&self) -> impl Iterator<Item = (DetectorType, &DetectionResult)> {
        DetectorType::ALL
            .iter()
            .filter_map(|&detector| self.results.get(&detector).map(|r| (detector, r)))
    }

    pub fn absent(&self) -> &BTreeMap<DetectorType, String> {
        &self.absent
    }

    pub fn absent_reason(&self, detector: DetectorType) -> Option<&str> {
        self.absent.get(&detector).map(String::as_str)
    }

    pub fn detectors_run(&self) -> Vec<DetectorType> {
        self.results().map(|(detector, _)| detector).collect()
    }

    pub fn detectors_absent(&self) -> Vec<DetectorType> {
        self.absent.keys().copied().collect()
    }

    pub fn total_detections(&self) -> usize {
        self.results.values().map(DetectionResult::len).sum()
    }

    /// Swap in the full-resolution image the working copy was made from and
    /// map every box onto it.
    pub fn rescale_to(&mut self, original: Arc<RgbImage>) {
        let (from_w, from_h) = self.image.dimensions();
        let (to_w, to_h) = original.dimensions();

        if (from_w, from_h) != (to_w, to_h) && from_w > 0 && from_h > 0 {
            let scale_x = to_w as f64 / from_w as f64;
            let scale_y = to_h as f64 / from_h as f64;
            for result in self.results.values_mut() {
                for detection in &mut result.detections {
                    detection.bbox = detection.bbox.rescale(scale_x, scale_y, to_w, to_h);
                }
            }
        }

        self.image = original;
    }
}
