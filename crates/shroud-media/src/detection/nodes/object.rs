//! Object detection using YOLOv8 ONNX models.
//!
//! Only privacy-relevant COCO classes survive: screens and documents at every
//! level, people at Paranoid.

use ndarray::{Axis, Ix2};
use shroud_models::{Detection, DetectionResult, DetectorType, PrivacyLevel};
use tracing::debug;

use crate::detection::postprocess::{non_maximum_suppression, scaled_threshold, Candidate};
use crate::detection::preprocess::{image_to_tensor, Normalization};
use crate::detection::NodeInput;
use crate::error::{MediaError, MediaResult};
use crate::registry::{ModelSession, ModelSpec, OutputTensor};

/// COCO class names (80 classes).
pub const COCO_CLASSES: &[&str] = &[
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck",
    "boat", "traffic light", "fire hydrant", "stop sign", "parking meter", "bench",
    "bird", "cat", "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra",
    "giraffe", "backpack", "umbrella", "handbag", "tie", "suitcase", "frisbee",
    "skis", "snowboard", "sports ball", "kite", "baseball bat", "baseball glove",
    "skateboard", "surfboard", "tennis racket", "bottle", "wine glass", "cup",
    "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink",
    "refrigerator", "book", "clock", "vase", "scissors", "teddy bear", "hair drier",
    "toothbrush",
];

/// Screens and documents.
pub const PRIVACY_CLASSES: &[&str] = &["tv", "laptop", "cell phone", "book"];

/// Extra classes redacted at Paranoid.
pub const PARANOID_CLASSES: &[&str] = &["person"];

/// Object detector node.
#[derive(Debug, Clone)]
pub struct ObjectNode {
    /// Confidence threshold at Balanced.
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for ObjectNode {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            nms_threshold: 0.45,
        }
    }
}

impl ObjectNode {
    pub fn detect(&self, input: &NodeInput, session: &ModelSession) -> MediaResult<DetectionResult> {
        let spec = ModelSpec::for_key(DetectorType::ObjectDetection, input.level);
        let tensor = image_to_tensor(&input.image, spec.input_width, spec.input_height, Normalization::UNIT);
        let outputs = session.run(tensor)?;
        let output = outputs.get_or_index("output0", 0)?;

        let threshold = scaled_threshold(self.confidence_threshold, input.level.threshold_scale());
        let (width, height) = input.image.dimensions();
        let detections = self.decode(
            output,
            (spec.input_width, spec.input_height),
            (width, height),
            threshold,
            input.level,
        )?;

        debug!(count = detections.len(), threshold, "Object detection completed");
        Ok(DetectionResult::new(detections))
    }

    /// Whether a class is redacted at `level`.
    pub fn is_privacy_class(class_id: usize, level: PrivacyLevel) -> bool {
        let Some(name) = COCO_CLASSES.get(class_id) else {
            return false;
        };
        PRIVACY_CLASSES.contains(name)
            || (level == PrivacyLevel::Paranoid && PARANOID_CLASSES.contains(name))
    }

    /// Postprocess YOLOv8 output.
    ///
    /// YOLOv8 output format: [1, 4 + C, N]
    /// - 4 bbox values (cx, cy, w, h) in network input pixels
    /// - C class scores
    /// - N detection candidates (8400 at 640x640)
    pub fn decode(
        &self,
        output: &OutputTensor,
        (input_w, input_h): (u32, u32),
        (width, height): (u32, u32),
        threshold: f32,
        level: PrivacyLevel,
    ) -> MediaResult<Vec<Detection>> {
        if output.shape.len() != 3 || output.shape[0] != 1 || output.shape[1] <= 4 {
            return Err(MediaError::detection_failed(format!(
                "object output shape {:?}, expected [1, 4 + C, N]",
                output.shape
            )));
        }
        let num_classes = output.shape[1] - 4;
        let num_boxes = output.shape[2];

        let view = output.view()?;
        let features = view
            .index_axis(Axis(0), 0)
            .into_dimensionality::<Ix2>()
            .map_err(|e| MediaError::detection_failed(format!("object output: {e}")))?; // [4 + C, N]

        let mut candidates = Vec::new();
        for i in 0..num_boxes {
            // Find best class
            let mut best_class = 0;
            let mut best_score = 0.0f32;
            for c in 0..num_classes {
                let score = features[[4 + c, i]];
                if score > best_score {
                    best_score = score;
                    best_class = c;
                }
            }

            if best_score < threshold || !Self::is_privacy_class(best_class, level) {
                continue;
            }

            candidates.push(Candidate::from_center(
                features[[0, i]],
                features[[1, i]],
                features[[2, i]],
                features[[3, i]],
                best_score,
                best_class,
            ));
        }

        // Scale factors to convert from model coordinates to original image
        let scale_x = width as f32 / input_w as f32;
        let scale_y = height as f32 / input_h as f32;

        Ok(non_maximum_suppression(candidates, self.nms_threshold, true)
            .into_iter()
            .filter_map(|c| {
                let bbox = c.to_bbox(scale_x, scale_y, width, height);
                (!bbox.is_degenerate()).then(|| Detection::new(bbox, c.score, COCO_CLASSES[c.class_id]))
            })
            .collect())
    }
}
