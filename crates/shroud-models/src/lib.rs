//! Shared data models for the Shroud privacy pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Privacy levels and redaction modes
//! - Detector and region types
//! - Pixel bounding boxes and detection results
//! - Anonymization status and run metadata

pub mod anonymization;
pub mod detection;
pub mod detector;
pub mod geometry;
pub mod privacy_level;
pub mod redaction;

// Re-export common types
pub use anonymization::{AnonymizationMetadata, AnonymizationStatus};
pub use detection::{Detection, DetectionResult};
pub use detector::{DetectorType, DetectorTypeParseError, RegionType};
pub use geometry::BoundingBox;
pub use privacy_level::{PrivacyLevel, PrivacyLevelParseError};
pub use redaction::{RedactionMode, RedactionModeParseError};
