//! Text detection from a DB-style probability map.
//!
//! The model emits `[1, 1, H, W]` per-pixel text probabilities at network
//! input resolution. Boxes come from 4-connected components of the
//! binarized map, scored by mean probability and grown by an unclip
//! distance.

use ndarray::ArrayView2;
use shroud_models::{Detection, DetectionResult, DetectorType};
use tracing::debug;

use crate::detection::postprocess::{scaled_threshold, Candidate};
use crate::detection::preprocess::{image_to_tensor, Normalization};
use crate::detection::NodeInput;
use crate::error::{MediaError, MediaResult};
use crate::registry::{ModelSession, ModelSpec, OutputTensor};

/// Text detector node.
#[derive(Debug, Clone)]
pub struct TextNode {
    /// Pixel probability above which a map pixel counts as text.
    pub binarize_threshold: f32,
    /// Minimum mean probability of a component at Balanced.
    pub box_threshold: f32,
    /// Components smaller than this many map pixels are dropped.
    pub min_area: usize,
    pub unclip_ratio: f32,
}

impl Default for TextNode {
    fn default() -> Self {
        Self {
            binarize_threshold: 0.3,
            box_threshold: 0.6,
            min_area: 16,
            unclip_ratio: 1.5,
        }
    }
}

impl TextNode {
    pub fn detect(&self, input: &NodeInput, session: &ModelSession) -> MediaResult<DetectionResult> {
        let spec = ModelSpec::for_key(DetectorType::TextDetection, input.level);
        let tensor = image_to_tensor(&input.image, spec.input_width, spec.input_height, Normalization::IMAGENET);
        let outputs = session.run(tensor)?;
        let output = outputs.get_or_index("maps", 0)?;

        let box_threshold = scaled_threshold(self.box_threshold, input.level.threshold_scale());
        let (width, height) = input.image.dimensions();
        let detections = self.decode(output, box_threshold, width, height)?;

        debug!(count = detections.len(), box_threshold, "Text detection completed");
        Ok(DetectionResult::new(detections))
    }

    /// Turn a probability map into pixel boxes for a `width` x `height` image.
    pub fn decode(
        &self,
        output: &OutputTensor,
        box_threshold: f32,
        width: u32,
        height: u32,
    ) -> MediaResult<Vec<Detection>> {
        if output.shape.len() != 4 || output.shape[0] != 1 || output.shape[1] != 1 {
            return Err(MediaError::detection_failed(format!(
                "text map shape {:?}, expected [1, 1, H, W]",
                output.shape
            )));
        }
        let map_h = output.shape[2];
        let map_w = output.shape[3];
        let view = output.view()?;
        let map = view
            .into_shape((map_h, map_w))
            .map_err(|e| MediaError::detection_failed(format!("text map: {e}")))?;

        let scale_x = width as f32 / map_w.max(1) as f32;
        let scale_y = height as f32 / map_h.max(1) as f32;

        Ok(self
            .components(map, box_threshold)
            .into_iter()
            .filter_map(|c| {
                let bbox = c.to_bbox(scale_x, scale_y, width, height);
                (!bbox.is_degenerate()).then(|| Detection::new(bbox, c.score, "text"))
            })
            .collect())
    }

    /// Scored, unclipped component boxes in map coordinates.
    fn components(&self, map: ArrayView2<'_, f32>, box_threshold: f32) -> Vec<Candidate> {
        let (h, w) = map.dim();
        let mut visited = vec![false; h * w];
        let mut stack = Vec::new();
        let mut boxes = Vec::new();

        for start_y in 0..h {
            for start_x in 0..w {
                let start = start_y * w + start_x;
                if visited[start] || map[[start_y, start_x]] <= self.binarize_threshold {
                    continue;
                }

                let (mut min_x, mut min_y, mut max_x, mut max_y) = (start_x, start_y, start_x, start_y);
                let mut count = 0usize;
                let mut sum = 0.0f32;

                visited[start] = true;
                stack.push((start_x, start_y));
                while let Some((x, y)) = stack.pop() {
                    count += 1;
                    sum += map[[y, x]];
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);

                    let neighbours = [
                        (x.wrapping_sub(1), y),
                        (x + 1, y),
                        (x, y.wrapping_sub(1)),
                        (x, y + 1),
                    ];
                    for (nx, ny) in neighbours {
                        if nx >= w || ny >= h {
                            continue;
                        }
                        let idx = ny * w + nx;
                        if !visited[idx] && map[[ny, nx]] > self.binarize_threshold {
                            visited[idx] = true;
                            stack.push((nx, ny));
                        }
                    }
                }

                if count < self.min_area {
                    continue;
                }
                let score = sum / count as f32;
                if score < box_threshold {
                    continue;
                }

                // Half-open box around the component, grown by the unclip
                // distance area * ratio / perimeter.
                let bw = (max_x - min_x + 1) as f32;
                let bh = (max_y - min_y + 1) as f32;
                let distance = bw * bh * self.unclip_ratio / (2.0 * (bw + bh));
                boxes.push(Candidate::new(
                    min_x as f32 - distance,
                    min_y as f32 - distance,
                    (max_x + 1) as f32 + distance,
                    (max_y + 1) as f32 + distance,
                    score,
                    0,
                ));
            }
        }

        boxes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_models::BoundingBox;

    fn map_with(w: usize, h: usize, blocks: &[(usize, usize, usize, usize, f32)]) -> OutputTensor {
        let mut data = vec![0.0f32; w * h];
        for &(x1, y1, x2, y2, p) in blocks {
            for y in y1..y2 {
                for x in x1..x2 {
                    data[y * w + x] = p;
                }
            }
        }
        OutputTensor::new(vec![1, 1, h, w], data).unwrap()
    }

    #[test]
    fn test_separate_components_become_boxes() {
        let node = TextNode {
            unclip_ratio: 0.0,
            ..Default::default()
        };
        let map = map_with(32, 32, &[(2, 2, 12, 6, 0.9), (20, 20, 30, 28, 0.8)]);

        let boxes = node.decode(&map, 0.6, 64, 64).unwrap();
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].bbox, BoundingBox::new(4, 4, 24, 12));
        assert_eq!(boxes[1].bbox, BoundingBox::new(40, 40, 60, 56));
        assert!(boxes.iter().all(|d| d.label == "text"));
    }

    #[test]
    fn test_small_and_weak_components_dropped() {
        let node = TextNode::default();
        // 3x3 = 9 pixels is below the minimum area; the second block is
        // above the binarize threshold but scores below the box threshold.
        let map = map_with(32, 32, &[(0, 0, 3, 3, 0.95), (10, 10, 20, 20, 0.4)]);
        assert!(node.decode(&map, 0.6, 32, 32).unwrap().is_empty());
    }

    #[test]
    fn test_unclip_grows_box() {
        let node = TextNode::default();
        let map = map_with(40, 40, &[(10, 10, 30, 20, 0.9)]);
        let boxes = node.decode(&map, 0.6, 40, 40).unwrap();
        assert_eq!(boxes.len(), 1);
        // 20x10 component: distance = 200 * 1.5 / 60 = 5.
        assert_eq!(boxes[0].bbox, BoundingBox::new(5, 5, 35, 25));
    }

    #[test]
    fn test_diagonal_pixels_are_not_connected() {
        let node = TextNode {
            min_area: 1,
            unclip_ratio: 0.0,
            ..Default::default()
        };
        let map = map_with(4, 4, &[(0, 0, 1, 1, 0.9), (1, 1, 2, 2, 0.9)]);
        assert_eq!(node.decode(&map, 0.6, 4, 4).unwrap().len(), 2);
    }
}
