//! Worker error types.

use std::path::PathBuf;

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unsupported input {path}: {reason}")]
    UnsupportedInput { path: PathBuf, reason: String },

    /// The pipeline did not produce a transmittable image.
    #[error("Refused to write {path}: {reason}")]
    Refused { path: PathBuf, reason: String },

    /// Two inputs would be written to the same output file.
    #[error("Output for {path} would overwrite the output of {other}")]
    OutputCollision { path: PathBuf, other: PathBuf },

    #[error("Task failed: {0}")]
    TaskFailed(String),

    #[error("Media error: {0}")]
    Media(#[from] shroud_media::MediaError),

    #[error("Pipeline config error: {0}")]
    PipelineConfig(#[from] shroud_media::ConfigError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn refused(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Refused {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn unsupported(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::UnsupportedInput {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn output_collision(path: impl Into<PathBuf>, other: impl Into<PathBuf>) -> Self {
        Self::OutputCollision {
            path: path.into(),
            other: other.into(),
        }
    }

    /// True when the pipeline withheld the image.
    pub fn is_refusal(&self) -> bool {
        matches!(self, Self::Refused { .. })
    }
}
