//! Detector and region type definitions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Kind of detector run over an image.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum DetectorType {
    /// Faces.
    FaceDetection,
    /// Screens, documents and (at Paranoid level) people.
    ObjectDetection,
    /// Any rendered or printed text.
    TextDetection,
    /// Text regions whose content is personally identifiable.
    PiiAnalysis,
}

impl DetectorType {
    /// All detector types in scheduling order.
    pub const ALL: &'static [DetectorType] = &[
        DetectorType::FaceDetection,
        DetectorType::ObjectDetection,
        DetectorType::TextDetection,
        DetectorType::PiiAnalysis,
    ];

    /// Returns the detector name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorType::FaceDetection => "face_detection",
            DetectorType::ObjectDetection => "object_detection",
            DetectorType::TextDetection => "text_detection",
            DetectorType::PiiAnalysis => "pii_analysis",
        }
    }

    /// Region type produced by this detector.
    pub fn region_type(&self) -> RegionType {
        match self {
            DetectorType::FaceDetection => RegionType::Face,
            DetectorType::ObjectDetection => RegionType::Object,
            DetectorType::TextDetection => RegionType::Text,
            DetectorType::PiiAnalysis => RegionType::Pii,
        }
    }

    /// Detectors whose output this detector consumes.
    pub fn dependencies(&self) -> &'static [DetectorType] {
        match self {
            DetectorType::PiiAnalysis => &[DetectorType::TextDetection],
            _ => &[],
        }
    }

    /// Scheduling wave: 0 for detectors working on the raw image, 1 for
    /// detectors consuming another detector's output.
    pub fn wave(&self) -> usize {
        if self.dependencies().is_empty() {
            0
        } else {
            1
        }
    }
}

impl fmt::Display for DetectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DetectorType {
    type Err = DetectorTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "face_detection" | "face" => Ok(DetectorType::FaceDetection),
            "object_detection" | "object" => Ok(DetectorType::ObjectDetection),
            "text_detection" | "text" => Ok(DetectorType::TextDetection),
            "pii_analysis" | "pii" => Ok(DetectorType::PiiAnalysis),
            _ => Err(DetectorTypeParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown detector type: {0}")]
pub struct DetectorTypeParseError(String);

/// Category of a region flagged for redaction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum RegionType {
    Face,
    Object,
    Text,
    Pii,
}

impl RegionType {
    pub const ALL: &'static [RegionType] = &[
        RegionType::Face,
        RegionType::Object,
        RegionType::Text,
        RegionType::Pii,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RegionType::Face => "face",
            RegionType::Object => "object",
            RegionType::Text => "text",
            RegionType::Pii => "pii",
        }
    }
}

impl fmt::Display for RegionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
