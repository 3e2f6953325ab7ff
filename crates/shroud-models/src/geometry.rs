//! Pixel-space bounding boxes.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Tolerance absorbing float error when growing boxes outward.
const EXPAND_EPSILON: f64 = 1e-6;

/// Axis-aligned box in pixel coordinates.
///
/// `x1..x2` and `y1..y2` are half-open when iterating pixels, so a box
/// `(0, 0, 10, 10)` covers 100 pixels. Invariant: `x2 >= x1`, `y2 >= y1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    /// Create a box, swapping corners if they are given in the wrong order.
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    /// Build a box from float corners, clamped to a `width` x `height` frame.
    ///
    /// Corners are rounded outward so the box never shrinks below what the
    /// model reported.
    pub fn from_f32_clamped(x1: f32, y1: f32, x2: f32, y2: f32, width: u32, height: u32) -> Self {
        let clamp = |v: f32, max: u32| -> f32 {
            if v.is_nan() {
                0.0
            } else {
                v.clamp(0.0, max as f32)
            }
        };
        let (lx, hx) = (clamp(x1.min(x2), width), clamp(x1.max(x2), width));
        let (ly, hy) = (clamp(y1.min(y2), height), clamp(y1.max(y2), height));
        Self {
            x1: lx.floor() as u32,
            y1: ly.floor() as u32,
            x2: (hx.ceil() as u32).min(width),
            y2: (hy.ceil() as u32).min(height),
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    /// Box area in pixels.
    #[inline]
    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// A box covering no pixels.
    #[inline]
    pub fn is_degenerate(&self) -> bool {
        self.x2 <= self.x1 || self.y2 <= self.y1
    }

    /// True when the box lies inside a `width` x `height` frame and its
    /// corners are ordered.
    pub fn is_within(&self, width: u32, height: u32) -> bool {
        self.x1 <= self.x2 && self.y1 <= self.y2 && self.x2 <= width && self.y2 <= height
    }

    /// Geometric overlap test. Touching edges count as overlapping so
    /// adjacent detections are redacted as one region.
    #[inline]
    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        !(self.x2 < other.x1 || other.x2 < self.x1 || self.y2 < other.y1 || other.y2 < self.y1)
    }

    /// Smallest box containing both boxes.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
            x2: self.x2.max(other.x2),
            y2: self.y2.max(other.y2),
        }
    }

    /// True when `other` lies entirely inside this box.
    pub fn contains(&self, other: &BoundingBox) -> bool {
        self.x1 <= other.x1 && self.y1 <= other.y1 && self.x2 >= other.x2 && self.y2 >= other.y2
    }

    /// True when pixel `(x, y)` is covered by this box.
    #[inline]
    pub fn contains_pixel(&self, x: u32, y: u32) -> bool {
        x >= self.x1 && x < self.x2 && y >= self.y1 && y < self.y2
    }

    /// Intersection over Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) as f64 * (y2 - y1) as f64;
        let union = self.area() as f64 + other.area() as f64 - intersection;

        if union > 0.0 {
            (intersection / union) as f32
        } else {
            0.0
        }
    }

    /// Grow the box symmetrically by `(factor - 1) / 2` of its width and
    /// height on each side, rounding outward and clamping to the frame.
    ///
    /// Factors below 1.0 are treated as 1.0; the result always contains `self`
    /// when `self` is within the frame.
    pub fn expand(&self, factor: f64, width: u32, height: u32) -> BoundingBox {
        let factor = if factor.is_finite() { factor.max(1.0) } else { 1.0 };
        let grow_x = (factor - 1.0) / 2.0 * self.width() as f64;
        let grow_y = (factor - 1.0) / 2.0 * self.height() as f64;

        let x1 = (self.x1 as f64 - grow_x + EXPAND_EPSILON).floor().max(0.0);
        let y1 = (self.y1 as f64 - grow_y + EXPAND_EPSILON).floor().max(0.0);
        let x2 = (self.x2 as f64 + grow_x - EXPAND_EPSILON).ceil().min(width as f64);
        let y2 = (self.y2 as f64 + grow_y - EXPAND_EPSILON).ceil().min(height as f64);

        BoundingBox {
            x1: (x1 as u32).min(self.x1),
            y1: (y1 as u32).min(self.y1),
            x2: (x2 as u32).max(self.x2.min(width)),
            y2: (y2 as u32).max(self.y2.min(height)),
        }
    }

    /// Map the box from a downscaled frame back to a larger one.
    ///
    /// `scale_x`/`scale_y` are target/source ratios; corners round outward and
    /// are clamped to the target frame.
    pub fn rescale(&self, scale_x: f64, scale_y: f64, width: u32, height: u32) -> BoundingBox {
        let x1 = (self.x1 as f64 * scale_x + EXPAND_EPSILON).floor().max(0.0) as u32;
        let y1 = (self.y1 as f64 * scale_y + EXPAND_EPSILON).floor().max(0.0) as u32;
        let x2 = ((self.x2 as f64 * scale_x - EXPAND_EPSILON).ceil() as u32).min(width);
        let y2 = ((self.y2 as f64 * scale_y - EXPAND_EPSILON).ceil() as u32).min(height);
        BoundingBox::new(x1.min(width), y1.min(height), x2, y2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_orders_corners() {
        let b = BoundingBox::new(200, 10, 100, 5);
        assert_eq!(b, BoundingBox { x1: 100, y1: 5, x2: 200, y2: 10 });
    }

    #[test]
    fn test_overlap_includes_touching_edges() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let touching = BoundingBox::new(10, 0, 20, 10);
        let apart = BoundingBox::new(11, 0, 20, 10);
        assert!(a.overlaps(&touching));
        assert!(!a.overlaps(&apart));
        assert!(touching.overlaps(&a));
    }

    #[test]
    fn test_expand_face_example() {
        let face = BoundingBox::new(100, 100, 200, 200);
        let expanded = face.expand(1.1, 640, 480);
        assert_eq!(expanded, BoundingBox::new(95, 95, 205, 205));
        assert!(expanded.contains(&face));
    }

    #[test]
    fn test_expand_clamps_to_frame() {
        let edge = BoundingBox::new(0, 0, 50, 40);
        let expanded = edge.expand(2.0, 60, 45);
        assert_eq!(expanded, BoundingBox::new(0, 0, 60, 45));
        assert!(expanded.is_within(60, 45));
    }

    #[test]
    fn test_expand_factor_one_is_identity() {
        let b = BoundingBox::new(3, 7, 31, 17);
        assert_eq!(b.expand(1.0, 100, 100), b);
        assert_eq!(b.expand(0.5, 100, 100), b);
    }

    #[test]
    fn test_expand_contains_and_within_grid() {
        let (w, h) = (97, 61);
        for factor in [1.0, 1.05, 1.1, 1.33, 1.5, 2.0, 3.7] {
            for x1 in (0..w).step_by(13) {
                for y1 in (0..h).step_by(11) {
                    let b = BoundingBox::new(x1, y1, (x1 + 17).min(w), (y1 + 9).min(h));
                    let e = b.expand(factor, w, h);
                    assert!(e.contains(&b), "{b:?} x{factor} -> {e:?}");
                    assert!(e.is_within(w, h), "{e:?} escapes frame");
                }
            }
        }
    }

    #[test]
    fn test_from_f32_clamped() {
        let b = BoundingBox::from_f32_clamped(-5.0, 10.4, 700.0, 20.2, 640, 480);
        assert_eq!(b, BoundingBox::new(0, 10, 640, 21));
        let nan = BoundingBox::from_f32_clamped(f32::NAN, 1.0, 2.0, 3.0, 10, 10);
        assert!(nan.is_within(10, 10));
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox::new(0, 0, 10, 10);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        let half = BoundingBox::new(5, 0, 15, 10);
        assert!((a.iou(&half) - 1.0 / 3.0).abs() < 1e-4);
        assert_eq!(a.iou(&BoundingBox::new(20, 20, 30, 30)), 0.0);
    }

    #[test]
    fn test_rescale_rounds_outward() {
        let b = BoundingBox::new(10, 10, 21, 21);
        let r = b.rescale(1.5, 1.5, 100, 100);
        assert_eq!(r, BoundingBox::new(15, 15, 32, 32));
        let clamped = BoundingBox::new(60, 60, 64, 64).rescale(2.0, 2.0, 120, 120);
        assert_eq!(clamped, BoundingBox::new(120, 120, 120, 120));
        assert!(clamped.is_degenerate());
    }

    #[test]
    fn test_degenerate() {
        assert!(BoundingBox::new(5, 5, 5, 10).is_degenerate());
        assert!(!BoundingBox::new(5, 5, 6, 6).is_degenerate());
    }
}
