//! Error types for detection and redaction.

use std::path::PathBuf;

use shroud_models::DetectorType;
use thiserror::Error;

/// Result type for pipeline operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while detecting or redacting.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Model artifact not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("Failed to load model {model}: {message}")]
    ModelLoad { model: String, message: String },

    #[error("Detector {detector} exceeded its deadline after {elapsed_ms}ms")]
    DetectionTimeout {
        detector: DetectorType,
        elapsed_ms: u64,
    },

    #[error("Detection failed: {0}")]
    DetectionFailed(String),

    #[error("Redaction failed: {0}")]
    Redaction(String),

    #[error(
        "Model cache exhausted: {resident} sessions resident, {checked_out} in use, capacity {capacity} \
         (lower the privacy level or raise max_cached_sessions)"
    )]
    RegistryCapacity {
        capacity: usize,
        resident: usize,
        checked_out: usize,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create a model load failure error.
    pub fn model_load(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ModelLoad {
            model: model.into(),
            message: message.into(),
        }
    }

    /// Create a detection failure error.
    pub fn detection_failed(message: impl Into<String>) -> Self {
        Self::DetectionFailed(message.into())
    }

    /// Create a redaction failure error.
    pub fn redaction(message: impl Into<String>) -> Self {
        Self::Redaction(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Errors that only take a single detector out of a run.
    pub fn is_detector_local(&self) -> bool {
        matches!(
            self,
            Self::ModelNotFound(_)
                | Self::ModelLoad { .. }
                | Self::DetectionTimeout { .. }
                | Self::DetectionFailed(_)
                | Self::Cancelled
        )
    }

    /// Short machine-readable reason used for metric labels.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::ModelNotFound(_) => "model_missing",
            Self::ModelLoad { .. } => "model_load",
            Self::DetectionTimeout { .. } => "timeout",
            Self::DetectionFailed(_) => "inference",
            Self::Redaction(_) => "redaction",
            Self::RegistryCapacity { .. } => "capacity",
            Self::Config(_) => "config",
            Self::Cancelled => "cancelled",
            Self::Io(_) => "io",
            Self::Image(_) => "image",
            Self::Internal(_) => "internal",
        }
    }
}
