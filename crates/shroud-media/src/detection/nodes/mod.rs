//! Detector node variants.

mod face;
mod object;
mod pii;
mod pii_patterns;
mod text;

pub use face::FaceNode;
pub use object::{ObjectNode, COCO_CLASSES, PARANOID_CLASSES, PRIVACY_CLASSES};
pub use pii::{ctc_greedy_decode, default_charset, load_charset, PiiNode};
pub use pii_patterns::{PiiClassifier, PiiKind, LICENSE_PLATE_LABEL};
pub use text::TextNode;

use shroud_models::{DetectionResult, DetectorType};
use tracing::{debug, warn};

use super::NodeInput;
use crate::config::PrivacyConfig;
use crate::error::{MediaError, MediaResult};
use crate::registry::{ModelCatalog, ModelSession};

/// One detector over one image.
///
/// Each variant turns the image into its model's input tensor and the model
/// output into pixel boxes of the input image.
#[derive(Debug, Clone)]
pub enum DetectionNode {
    Face(FaceNode),
    Object(ObjectNode),
    Text(TextNode),
    Pii(PiiNode),
}

impl DetectionNode {
    /// Build the node for `detector` with default tuning.
    pub fn for_detector(
        detector: DetectorType,
        config: &PrivacyConfig,
        catalog: &ModelCatalog,
    ) -> MediaResult<Self> {
        Ok(match detector {
            DetectorType::FaceDetection => Self::Face(FaceNode::default()),
            DetectorType::ObjectDetection => Self::Object(ObjectNode::default()),
            DetectorType::TextDetection => Self::Text(TextNode::default()),
            DetectorType::PiiAnalysis => {
                let path = catalog.charset_path();
                let charset = match load_charset(&path) {
                    Ok(charset) => charset,
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "Using built-in recognizer charset");
                        default_charset()
                    }
                };
                Self::Pii(PiiNode::new(config.performance.batch_size, charset)?)
            }
        })
    }

    pub fn detector_type(&self) -> DetectorType {
        match self {
            Self::Face(_) => DetectorType::FaceDetection,
            Self::Object(_) => DetectorType::ObjectDetection,
            Self::Text(_) => DetectorType::TextDetection,
            Self::Pii(_) => DetectorType::PiiAnalysis,
        }
    }

    /// Run the detector with a checked-out session.
    pub fn detect(&self, input: &NodeInput, session: &ModelSession) -> MediaResult<DetectionResult> {
        let detector = self.detector_type();
        if session.key().detector != detector {
            return Err(MediaError::internal(format!(
                "{} node given a {} session",
                detector,
                session.key()
            )));
        }

        let result = match self {
            Self::Face(node) => node.detect(input, session),
            Self::Object(node) => node.detect(input, session),
            Self::Text(node) => node.detect(input, session),
            Self::Pii(node) => node.detect(input, session),
        }?;

        let (width, height) = input.image.dimensions();
        if !result.all_within(width, height) {
            warn!(detector = %detector, "Detector produced boxes outside the image");
            return Err(MediaError::detection_failed(format!(
                "{detector} produced boxes outside the image"
            )));
        }

        Ok(result)
    }
}
