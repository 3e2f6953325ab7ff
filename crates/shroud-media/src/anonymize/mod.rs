//! Anonymization: turn detections into a redacted image.
//!
//! Boxes are expanded, grouped by region type and merged until no two boxes
//! of a type overlap, then redacted on a copy of the original image.

pub mod effects;
mod engine;
pub mod regions;
mod result;

pub use engine::AnonymizationEngine;
pub use regions::{MergedRegion, Region};
pub use result::AnonymizationResult;
