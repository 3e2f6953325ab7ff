//! Shared output post-processing.

use shroud_models::BoundingBox;

/// A scored box in float pixel coordinates, before NMS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
    pub class_id: usize,
}

impl Candidate {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, score: f32, class_id: usize) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            score,
            class_id,
        }
    }

    /// Build from center format (cx, cy, w, h).
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32, score: f32, class_id: usize) -> Self {
        Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0, score, class_id)
    }

    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Compute Intersection over Union (IoU) between two candidates.
    pub fn iou(&self, other: &Candidate) -> f32 {
        let inter_w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let inter_h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let intersection = inter_w * inter_h;
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Scale into a `width` x `height` frame and clamp.
    pub fn to_bbox(&self, scale_x: f32, scale_y: f32, width: u32, height: u32) -> BoundingBox {
        BoundingBox::from_f32_clamped(
            self.x1 * scale_x,
            self.y1 * scale_y,
            self.x2 * scale_x,
            self.y2 * scale_y,
            width,
            height,
        )
    }
}

/// Apply Non-Maximum Suppression to remove overlapping candidates.
///
/// With `class_aware`, only candidates of the same class suppress each other.
pub fn non_maximum_suppression(
    mut candidates: Vec<Candidate>,
    iou_threshold: f32,
    class_aware: bool,
) -> Vec<Candidate> {
    if candidates.is_empty() {
        return candidates;
    }

    // Sort by score (descending)
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep = Vec::new();
    let mut suppressed = vec![false; candidates.len()];

    for i in 0..candidates.len() {
        if suppressed[i] {
            continue;
        }

        keep.push(candidates[i]);

        for j in (i + 1)..candidates.len() {
            if suppressed[j] {
                continue;
            }

            if class_aware && candidates[i].class_id != candidates[j].class_id {
                continue;
            }

            if candidates[i].iou(&candidates[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Scale a base threshold and keep it in a usable range.
pub fn scaled_threshold(base: f32, scale: f32) -> f32 {
    (base * scale).clamp(0.05, 0.95)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let candidates = vec![
            Candidate::new(0.0, 0.0, 10.0, 10.0, 0.6, 0),
            Candidate::new(1.0, 1.0, 11.0, 11.0, 0.9, 0),
            Candidate::new(50.0, 50.0, 60.0, 60.0, 0.5, 0),
        ];
        let kept = non_maximum_suppression(candidates, 0.3, false);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[1].score, 0.5);
    }

    #[test]
    fn test_class_aware_nms() {
        let candidates = vec![
            Candidate::new(0.0, 0.0, 10.0, 10.0, 0.9, 62),
            Candidate::new(0.0, 0.0, 10.0, 10.0, 0.8, 63),
        ];
        assert_eq!(non_maximum_suppression(candidates.clone(), 0.45, true).len(), 2);
        assert_eq!(non_maximum_suppression(candidates, 0.45, false).len(), 1);
    }

    #[test]
    fn test_to_bbox_clamps() {
        let c = Candidate::from_center(5.0, 5.0, 20.0, 4.0, 0.9, 0);
        assert_eq!(c.to_bbox(2.0, 2.0, 16, 16), BoundingBox::new(0, 6, 16, 14));
    }

    #[test]
    fn test_scaled_threshold() {
        assert!((scaled_threshold(0.5, 0.6) - 0.3).abs() < 1e-6);
        assert_eq!(scaled_threshold(0.9, 1.2), 0.95);
    }
}
