//! Redaction of detected regions.

use std::collections::BTreeMap;
use std::time::Instant;

use image::RgbImage;
use shroud_models::{RedactionMode, RegionType};
use tracing::{debug, error, info};

use super::effects;
use super::regions::{collect_regions, merge_regions, MergedRegion};
use super::result::AnonymizationResult;
use crate::config::RedactionConfig;
use crate::detection::nodes::LICENSE_PLATE_LABEL;
use crate::detection::ProcessingContext;
use crate::error::MediaResult;

/// Expands, merges and redacts the regions of a [`ProcessingContext`].
///
/// Any failure yields an `Error` result without an image; a partially
/// redacted image is never returned.
#[derive(Debug, Clone, Default)]
pub struct AnonymizationEngine {
    config: RedactionConfig,
}

impl AnonymizationEngine {
    pub fn new(config: RedactionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RedactionConfig {
        &self.config
    }

    /// Effect used for a merged region.
    pub fn resolve_mode(&self, region: &MergedRegion) -> RedactionMode {
        match region.region_type {
            RegionType::Face => self.config.face_mode,
            RegionType::Text | RegionType::Pii if region.has_label(LICENSE_PLATE_LABEL) => {
                self.config.license_plate_mode
            }
            RegionType::Text | RegionType::Pii => self.config.pii_text_mode,
            RegionType::Object => self.config.object_mode,
        }
    }

    /// Redact a copy of the context image.
    pub fn anonymize(&self, context: &ProcessingContext) -> AnonymizationResult {
        let start = Instant::now();

        match self.redact(context) {
            Ok((image, by_type)) => {
                let result = AnonymizationResult::redacted(image, by_type, context, start.elapsed());
                info!(
                    status = %result.status,
                    regions = result.regions_processed,
                    elapsed_ms = result.elapsed_ms(),
                    "Anonymization completed"
                );
                result
            }
            Err(e) => {
                error!(error = %e, "Anonymization failed; image withheld");
                AnonymizationResult::failed(&e, start.elapsed()).with_detectors(context)
            }
        }
    }

    fn redact(&self, context: &ProcessingContext) -> MediaResult<(RgbImage, BTreeMap<RegionType, usize>)> {
        let regions = collect_regions(context, self.config.expansion_factor)?;
        let collected = regions.len();
        let merged = merge_regions(regions);
        debug!(collected, merged = merged.len(), "Regions merged");

        let mut image = context.image().as_ref().clone();
        let mut by_type = BTreeMap::new();

        for region in &merged {
            if region.bbox.is_degenerate() {
                continue;
            }
            let mode = self.resolve_mode(region);
            effects::apply(&mut image, region.bbox, mode, &self.config)?;
            *by_type.entry(region.region_type).or_insert(0) += 1;
        }

        Ok((image, by_type))
    }
}
