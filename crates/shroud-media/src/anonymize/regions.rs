//! Region collection and overlap merging.

use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;
use shroud_models::{BoundingBox, RegionType};
use tracing::debug;

use crate::detection::ProcessingContext;
use crate::error::{MediaError, MediaResult};

/// An expanded detection box awaiting merge.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub bbox: BoundingBox,
    pub region_type: RegionType,
    pub label: String,
    pub confidence: f32,
}

/// A post-merge box and what went into it.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRegion {
    pub bbox: BoundingBox,
    pub region_type: RegionType,
    pub labels: BTreeSet<String>,
    /// Highest confidence among the merged detections.
    pub confidence: f32,
    pub source_count: usize,
}

impl MergedRegion {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    fn absorb(&mut self, other: MergedRegion) {
        self.bbox = self.bbox.union(&other.bbox);
        self.labels.extend(other.labels);
        self.confidence = self.confidence.max(other.confidence);
        self.source_count += other.source_count;
    }
}

impl From<Region> for MergedRegion {
    fn from(region: Region) -> Self {
        Self {
            bbox: region.bbox,
            region_type: region.region_type,
            labels: BTreeSet::from([region.label]),
            confidence: region.confidence,
            source_count: 1,
        }
    }
}

/// Validate and expand every present detection.
///
/// A box outside the image or with unordered corners is an error; a box
/// covering no pixels is dropped.
pub fn collect_regions(context: &ProcessingContext, expansion_factor: f64) -> MediaResult<Vec<Region>> {
    let (width, height) = context.dimensions();
    let mut regions = Vec::new();

    for (detector, result) in context.results() {
        for detection in result.iter() {
            let bbox = detection.bbox;
            if !bbox.is_within(width, height) {
                return Err(MediaError::redaction(format!(
                    "{detector} box ({}, {}, {}, {}) is invalid for a {width}x{height} image",
                    bbox.x1, bbox.y1, bbox.x2, bbox.y2
                )));
            }
            if bbox.is_degenerate() {
                debug!(detector = %detector, "Skipping empty box");
                continue;
            }

            regions.push(Region {
                bbox: bbox.expand(expansion_factor, width, height),
                region_type: detector.region_type(),
                label: detection.label.clone(),
                confidence: detection.confidence,
            });
        }
    }

    Ok(regions)
}

/// Merge overlapping regions within each region type.
///
/// Output is ordered by region type, then by box corners.
pub fn merge_regions(regions: Vec<Region>) -> Vec<MergedRegion> {
    let mut groups: BTreeMap<RegionType, Vec<MergedRegion>> = BTreeMap::new();
    for region in regions {
        groups
            .entry(region.region_type)
            .or_default()
            .push(MergedRegion::from(region));
    }

    // Groups never interact, so they merge independently.
    let groups: Vec<Vec<MergedRegion>> = groups.into_values().collect();
    groups
        .into_par_iter()
        .map(|group| merge_until_stable(group, |r| r.bbox, MergedRegion::absorb))
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect()
}

/// Merge overlapping boxes into their bounding unions.
pub fn merge_boxes(boxes: Vec<BoundingBox>) -> Vec<BoundingBox> {
    merge_until_stable(boxes, |b| *b, |a, b| *a = a.union(&b))
}

/// Sort by corners and sweep, folding each item into the first kept item it
/// overlaps. Passes repeat until one merges nothing, which leaves the items
/// sorted and pairwise disjoint.
fn merge_until_stable<T>(
    mut items: Vec<T>,
    bbox: impl Fn(&T) -> BoundingBox,
    absorb: impl Fn(&mut T, T),
) -> Vec<T> {
    loop {
        items.sort_by_key(|item| {
            let b = bbox(item);
            (b.x1, b.y1, b.x2, b.y2)
        });

        let before = items.len();
        let mut kept: Vec<T> = Vec::with_capacity(before);
        for item in items {
            let b = bbox(&item);
            match kept.iter_mut().find(|k| bbox(&**k).overlaps(&b)) {
                Some(target) => absorb(target, item),
                None => kept.push(item),
            }
        }

        if kept.len() == before {
            return kept;
        }
        items = kept;
    }
}
