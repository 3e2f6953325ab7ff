//! Privacy level definitions.
//!
//! A privacy level picks the model variant each detector runs with:
//!
//! - `Speed`: quantized, low-resolution variants (fastest)
//! - `Balanced`: full-precision default variants
//! - `Paranoid`: high-recall variants with lower confidence thresholds

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Speed/accuracy tradeoff point for a pipeline run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyLevel {
    /// Smallest models, highest thresholds.
    Speed,

    /// Default tradeoff.
    #[default]
    Balanced,

    /// Largest models, lowest thresholds. Misses are worse than false positives.
    Paranoid,
}

impl PrivacyLevel {
    /// All privacy levels, fastest first.
    pub const ALL: &'static [PrivacyLevel] = &[
        PrivacyLevel::Speed,
        PrivacyLevel::Balanced,
        PrivacyLevel::Paranoid,
    ];

    /// Returns the level name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivacyLevel::Speed => "speed",
            PrivacyLevel::Balanced => "balanced",
            PrivacyLevel::Paranoid => "paranoid",
        }
    }

    /// Returns a human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            PrivacyLevel::Speed => "Quantized models, fastest redaction",
            PrivacyLevel::Balanced => "Full-precision models, default thresholds",
            PrivacyLevel::Paranoid => "High-recall models, aggressive thresholds",
        }
    }

    /// Confidence multiplier applied to detector thresholds.
    ///
    /// Paranoid lowers every threshold so borderline detections still get redacted.
    pub fn threshold_scale(&self) -> f32 {
        match self {
            PrivacyLevel::Speed => 1.2,
            PrivacyLevel::Balanced => 1.0,
            PrivacyLevel::Paranoid => 0.6,
        }
    }
}

impl fmt::Display for PrivacyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PrivacyLevel {
    type Err = PrivacyLevelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "speed" | "fast" => Ok(PrivacyLevel::Speed),
            "balanced" | "default" => Ok(PrivacyLevel::Balanced),
            "paranoid" | "max" => Ok(PrivacyLevel::Paranoid),
            _ => Err(PrivacyLevelParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown privacy level: {0}")]
pub struct PrivacyLevelParseError(String);
