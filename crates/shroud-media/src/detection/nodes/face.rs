//! Face detection (UltraFace-style SSD output).
//!
//! Outputs: `scores [1, N, 2]` (background, face) and `boxes [1, N, 4]` with
//! normalized corner coordinates.

use shroud_models::{Detection, DetectionResult, DetectorType};
use tracing::debug;

use crate::detection::postprocess::{non_maximum_suppression, scaled_threshold, Candidate};
use crate::detection::preprocess::{image_to_tensor, Normalization};
use crate::detection::NodeInput;
use crate::error::{MediaError, MediaResult};
use crate::registry::{ModelOutputs, ModelSession, ModelSpec};

/// Face detector node.
#[derive(Debug, Clone)]
pub struct FaceNode {
    /// Face score threshold at Balanced.
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for FaceNode {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            nms_threshold: 0.3,
        }
    }
}

impl FaceNode {
    pub fn detect(&self, input: &NodeInput, session: &ModelSession) -> MediaResult<DetectionResult> {
        let spec = ModelSpec::for_key(DetectorType::FaceDetection, input.level);
        let tensor = image_to_tensor(&input.image, spec.input_width, spec.input_height, Normalization::CENTERED);
        let outputs = session.run(tensor)?;

        let threshold = scaled_threshold(self.confidence_threshold, input.level.threshold_scale());
        let (width, height) = input.image.dimensions();
        let detections = self.decode(&outputs, threshold, width, height)?;

        debug!(count = detections.len(), threshold, "Face detection completed");
        Ok(DetectionResult::new(detections))
    }

    /// Decode UltraFace outputs into pixel boxes for a `width` x `height` image.
    pub fn decode(
        &self,
        outputs: &ModelOutputs,
        threshold: f32,
        width: u32,
        height: u32,
    ) -> MediaResult<Vec<Detection>> {
        let scores = outputs.get_or_index("scores", 0)?;
        let boxes = outputs.get_or_index("boxes", 1)?;

        if scores.shape.len() != 3 || scores.shape[0] != 1 || scores.shape[2] != 2 {
            return Err(MediaError::detection_failed(format!(
                "face scores shape {:?}, expected [1, N, 2]",
                scores.shape
            )));
        }
        let num_boxes = scores.shape[1];
        if boxes.shape != [1, num_boxes, 4] {
            return Err(MediaError::detection_failed(format!(
                "face boxes shape {:?}, expected [1, {}, 4]",
                boxes.shape, num_boxes
            )));
        }

        let candidates: Vec<Candidate> = (0..num_boxes)
            .filter_map(|i| {
                let score = scores.data[i * 2 + 1];
                if score < threshold {
                    return None;
                }
                let b = &boxes.data[i * 4..i * 4 + 4];
                Some(Candidate::new(b[0], b[1], b[2], b[3], score, 0))
            })
            .collect();

        Ok(non_maximum_suppression(candidates, self.nms_threshold, false)
            .into_iter()
            .filter_map(|c| {
                let bbox = c.to_bbox(width as f32, height as f32, width, height);
                (!bbox.is_degenerate()).then(|| Detection::new(bbox, c.score, "face"))
            })
            .collect())
    }
}
