//! Model artifact catalog.
//!
//! One ONNX file per (detector, privacy level), stored as
//! `{model_base_path}/{detector}/{file}`:
//!
//! | Detector | Speed | Balanced | Paranoid |
//! |----------|-------|----------|----------|
//! | face_detection | RFB-320 INT8 | RFB-640 | RFB-640 (low threshold) |
//! | object_detection | YOLOv8n @320 | YOLOv8n @640 | YOLOv8s @640 |
//! | text_detection | DB MobileNet @480 | DB MobileNet @736 | DB ResNet @960 |
//! | pii_analysis | CRNN mobile INT8 | CRNN mobile | CRNN server |

use std::fmt;
use std::path::{Path, PathBuf};

use shroud_models::{DetectorType, PrivacyLevel};
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// Identifies one cached session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelKey {
    pub detector: DetectorType,
    pub level: PrivacyLevel,
}

impl ModelKey {
    pub fn new(detector: DetectorType, level: PrivacyLevel) -> Self {
        Self { detector, level }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.detector, self.level)
    }
}

/// Static description of one model artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSpec {
    pub file: &'static str,
    /// Network input width in pixels.
    pub input_width: u32,
    /// Network input height in pixels.
    pub input_height: u32,
}

impl ModelSpec {
    const fn new(file: &'static str, input_width: u32, input_height: u32) -> Self {
        Self {
            file,
            input_width,
            input_height,
        }
    }

    /// Look up the artifact for a key.
    pub const fn for_key(detector: DetectorType, level: PrivacyLevel) -> Self {
        use DetectorType::*;
        use PrivacyLevel::*;

        match (detector, level) {
            (FaceDetection, Speed) => Self::new("version-RFB-320-int8.onnx", 320, 240),
            (FaceDetection, Balanced) => Self::new("version-RFB-640.onnx", 640, 480),
            (FaceDetection, Paranoid) => Self::new("version-RFB-640-hr.onnx", 640, 480),

            (ObjectDetection, Speed) => Self::new("yolov8n-320.onnx", 320, 320),
            (ObjectDetection, Balanced) => Self::new("yolov8n.onnx", 640, 640),
            (ObjectDetection, Paranoid) => Self::new("yolov8s.onnx", 640, 640),

            (TextDetection, Speed) => Self::new("db_mobilenet_480.onnx", 480, 480),
            (TextDetection, Balanced) => Self::new("db_mobilenet_736.onnx", 736, 736),
            (TextDetection, Paranoid) => Self::new("db_resnet_960.onnx", 960, 960),

            (PiiAnalysis, Speed) => Self::new("crnn_mobile_int8.onnx", 320, 48),
            (PiiAnalysis, Balanced) => Self::new("crnn_mobile.onnx", 320, 48),
            (PiiAnalysis, Paranoid) => Self::new("crnn_server.onnx", 320, 48),
        }
    }
}

/// Resolves model keys to files under a base directory.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    base_path: PathBuf,
    /// Minimum model file size to consider valid (corruption check).
    min_file_size: u64,
}

impl ModelCatalog {
    /// Recognizer charset, one symbol per line, next to the PII models.
    pub const CHARSET_FILE: &'static str = "charset.txt";

    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            min_file_size: 1024,
        }
    }

    pub fn with_min_file_size(mut self, min_file_size: u64) -> Self {
        self.min_file_size = min_file_size;
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn spec(&self, key: ModelKey) -> ModelSpec {
        ModelSpec::for_key(key.detector, key.level)
    }

    /// Path of the artifact for `key`, whether or not it exists.
    pub fn path_for(&self, key: ModelKey) -> PathBuf {
        self.base_path
            .join(key.detector.as_str())
            .join(self.spec(key).file)
    }

    /// Path of the recognizer charset file.
    pub fn charset_path(&self) -> PathBuf {
        self.base_path
            .join(DetectorType::PiiAnalysis.as_str())
            .join(Self::CHARSET_FILE)
    }

    /// Detector a resolved artifact path belongs to.
    pub fn detector_for_path(path: &Path) -> Option<DetectorType> {
        path.parent()?
            .file_name()?
            .to_str()?
            .parse()
            .ok()
    }

    /// Resolve and check the artifact for `key`.
    ///
    /// Missing files yield `ModelNotFound`; files below the minimum size are
    /// reported as corrupt load failures.
    pub fn resolve(&self, key: ModelKey) -> MediaResult<PathBuf> {
        let path = self.path_for(key);
        let metadata = match std::fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MediaError::ModelNotFound(path));
            }
            Err(e) => return Err(MediaError::Io(e)),
        };

        if !metadata.is_file() || metadata.len() < self.min_file_size {
            return Err(MediaError::model_load(
                key.to_string(),
                format!(
                    "{} is {} bytes, below the {} byte minimum (corrupt download?)",
                    path.display(),
                    metadata.len(),
                    self.min_file_size
                ),
            ));
        }

        debug!(model = %key, path = %path.display(), "Resolved model artifact");
        Ok(path)
    }

    /// Keys whose artifacts are missing or corrupt.
    pub fn missing(&self, keys: impl IntoIterator<Item = ModelKey>) -> Vec<(ModelKey, PathBuf)> {
        keys.into_iter()
            .filter(|&key| self.resolve(key).is_err())
            .map(|key| (key, self.path_for(key)))
            .collect()
    }
}
