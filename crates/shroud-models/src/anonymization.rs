//! Pipeline output metadata read by downstream consumers.

use std::collections::BTreeMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::detector::DetectorType;

/// Outcome of an anonymization run.
///
/// `Error` means the image must not leave the device; callers must not fall
/// back to the unredacted original.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AnonymizationStatus {
    /// At least one region was redacted.
    Success,
    /// Nothing was detected; the output equals the input.
    NoRegions,
    /// Redaction failed; no image is produced.
    Error,
}

impl AnonymizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnonymizationStatus::Success => "success",
            AnonymizationStatus::NoRegions => "no_regions",
            AnonymizationStatus::Error => "error",
        }
    }

    /// Whether an image with this status may be sent off-device.
    pub fn is_transmittable(&self) -> bool {
        !matches!(self, AnonymizationStatus::Error)
    }
}

impl fmt::Display for AnonymizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured metadata describing one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnonymizationMetadata {
    /// Regions redacted after merging.
    pub regions_processed: usize,
    /// Post-merge region counts keyed by region type name.
    pub by_type: BTreeMap<String, usize>,
    pub elapsed_ms: f64,
    pub status: AnonymizationStatus,
    /// Detectors that produced a result.
    #[serde(default)]
    pub detectors_run: Vec<DetectorType>,
    /// Detectors that were enabled but failed, timed out or were unavailable.
    #[serde(default)]
    pub detectors_absent: Vec<DetectorType>,
    /// Why each absent detector produced no result, keyed by detector name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub absent_reasons: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
