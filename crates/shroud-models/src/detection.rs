//! Detector output types.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::geometry::BoundingBox;

/// A single detection: box, confidence and label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Model confidence in [0, 1].
    pub confidence: f32,
    /// Detector-specific label (`face`, `laptop`, `email`, ...).
    pub label: String,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f32, label: impl Into<String>) -> Self {
        Self {
            bbox,
            confidence,
            label: label.into(),
        }
    }
}

/// Ordered output of one detector over one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
    /// Wall-clock time spent in the detector, in milliseconds.
    pub inference_ms: f64,
}

impl DetectionResult {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            inference_ms: 0.0,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_inference_ms(mut self, inference_ms: f64) -> Self {
        self.inference_ms = inference_ms;
        self
    }

    pub fn push(&mut self, detection: Detection) {
        self.detections.push(detection);
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter()
    }

    /// True when every box lies inside a `width` x `height` frame.
    pub fn all_within(&self, width: u32, height: u32) -> bool {
        self.detections.iter().all(|d| d.bbox.is_within(width, height))
    }
}
