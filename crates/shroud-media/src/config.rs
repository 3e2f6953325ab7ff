//! Pipeline configuration.
//!
//! `PrivacyConfig` deserializes with per-field defaults, so an empty file or
//! an empty environment yields a working Balanced configuration. Values are
//! layered with the `config` crate: an optional file first, then
//! `SHROUD__`-prefixed environment variables
//! (e.g. `SHROUD__REDACTION__FACE_MODE=pixelate`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shroud_models::{DetectorType, PrivacyLevel, RedactionMode};
use thiserror::Error;

use crate::error::MediaError;

/// Environment prefix for configuration overrides.
pub const ENV_PREFIX: &str = "SHROUD";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Source(#[from] config::ConfigError),

    #[error("Invalid value for {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

impl From<ConfigError> for MediaError {
    fn from(err: ConfigError) -> Self {
        MediaError::Config(err.to_string())
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    /// When false every run returns an `Error` result.
    pub enabled: bool,
    /// Default privacy level for warm-up and self-checks.
    pub level: PrivacyLevel,
    /// Root directory holding one sub-directory per detector.
    pub model_base_path: PathBuf,
    pub detectors: DetectorToggles,
    pub redaction: RedactionConfig,
    pub performance: PerformanceConfig,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: PrivacyLevel::Balanced,
            model_base_path: PathBuf::from("./models"),
            detectors: DetectorToggles::default(),
            redaction: RedactionConfig::default(),
            performance: PerformanceConfig::default(),
        }
    }
}

/// Which detectors run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorToggles {
    pub face: bool,
    pub object: bool,
    pub text: bool,
    pub pii: bool,
}

impl Default for DetectorToggles {
    fn default() -> Self {
        Self {
            face: true,
            object: true,
            text: true,
            pii: true,
        }
    }
}

impl DetectorToggles {
    pub fn is_enabled(&self, detector: DetectorType) -> bool {
        match detector {
            DetectorType::FaceDetection => self.face,
            DetectorType::ObjectDetection => self.object,
            DetectorType::TextDetection => self.text,
            DetectorType::PiiAnalysis => self.pii,
        }
    }

    /// Detectors that must run, including dependencies of enabled ones.
    ///
    /// Ordered by `DetectorType::ALL`.
    pub fn scheduled(&self) -> Vec<DetectorType> {
        DetectorType::ALL
            .iter()
            .copied()
            .filter(|&detector| {
                self.is_enabled(detector)
                    || DetectorType::ALL
                        .iter()
                        .any(|&d| self.is_enabled(d) && d.dependencies().contains(&detector))
            })
            .collect()
    }
}

/// Redaction modes and effect parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactionConfig {
    pub face_mode: RedactionMode,
    pub license_plate_mode: RedactionMode,
    pub pii_text_mode: RedactionMode,
    pub object_mode: RedactionMode,
    /// Odd Gaussian kernel size.
    pub blur_kernel_size: u32,
    pub pixelate_block_size: u32,
    /// Box growth factor; 1.1 grows each box by 5% per side.
    pub expansion_factor: f64,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            face_mode: RedactionMode::Blur,
            license_plate_mode: RedactionMode::Pixelate,
            pii_text_mode: RedactionMode::BlackBox,
            object_mode: RedactionMode::BlackBox,
            blur_kernel_size: 21,
            pixelate_block_size: 16,
            expansion_factor: 1.1,
        }
    }
}

/// Resource limits and the latency budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Longest image side fed to detectors; larger images are downscaled.
    pub max_image_size: u32,
    /// Share of GPU memory a CUDA session may claim.
    pub gpu_memory_fraction: f64,
    /// Total GPU memory in MiB; 0 leaves the arena unlimited.
    pub gpu_total_memory_mb: u64,
    /// Text crops recognized per PII inference call.
    pub batch_size: usize,
    /// Keep sessions resident between runs.
    pub model_caching: bool,
    pub max_cached_sessions: usize,
    /// End-to-end budget per image.
    pub time_budget_ms: u64,
    /// Part of the budget kept back for redaction.
    pub anonymization_reserve_ms: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_image_size: 1920,
            gpu_memory_fraction: 0.5,
            gpu_total_memory_mb: 0,
            batch_size: 8,
            model_caching: true,
            max_cached_sessions: 6,
            time_budget_ms: 5000,
            anonymization_reserve_ms: 1000,
        }
    }
}

impl PerformanceConfig {
    pub fn time_budget(&self) -> Duration {
        Duration::from_millis(self.time_budget_ms)
    }

    /// Time detectors get before they are cancelled.
    pub fn detection_budget(&self) -> Duration {
        Duration::from_millis(
            self.time_budget_ms
                .saturating_sub(self.anonymization_reserve_ms),
        )
    }

    /// CUDA arena limit in bytes, if a total was configured.
    pub fn gpu_memory_limit_bytes(&self) -> Option<usize> {
        if self.gpu_total_memory_mb == 0 {
            return None;
        }
        let bytes = self.gpu_total_memory_mb as f64 * 1024.0 * 1024.0 * self.gpu_memory_fraction;
        Some(bytes as usize)
    }
}

impl PrivacyConfig {
    /// Load configuration from an optional file plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: PrivacyConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let redaction = &self.redaction;
        let performance = &self.performance;

        if redaction.blur_kernel_size < 3 || redaction.blur_kernel_size % 2 == 0 {
            return Err(ConfigError::invalid(
                "redaction.blur_kernel_size",
                format!("must be odd and >= 3, got {}", redaction.blur_kernel_size),
            ));
        }
        if redaction.pixelate_block_size < 2 {
            return Err(ConfigError::invalid(
                "redaction.pixelate_block_size",
                format!("must be >= 2, got {}", redaction.pixelate_block_size),
            ));
        }
        if !redaction.expansion_factor.is_finite() || redaction.expansion_factor < 1.0 {
            return Err(ConfigError::invalid(
                "redaction.expansion_factor",
                format!("must be >= 1.0, got {}", redaction.expansion_factor),
            ));
        }
        if performance.max_image_size < 32 {
            return Err(ConfigError::invalid(
                "performance.max_image_size",
                format!("must be >= 32, got {}", performance.max_image_size),
            ));
        }
        if !(performance.gpu_memory_fraction > 0.0 && performance.gpu_memory_fraction <= 1.0) {
            return Err(ConfigError::invalid(
                "performance.gpu_memory_fraction",
                format!("must be in (0, 1], got {}", performance.gpu_memory_fraction),
            ));
        }
        if performance.batch_size == 0 {
            return Err(ConfigError::invalid("performance.batch_size", "must be >= 1"));
        }
        if performance.max_cached_sessions == 0 {
            return Err(ConfigError::invalid(
                "performance.max_cached_sessions",
                "must be >= 1",
            ));
        }
        if performance.time_budget_ms == 0 {
            return Err(ConfigError::invalid("performance.time_budget_ms", "must be > 0"));
        }
        if performance.anonymization_reserve_ms >= performance.time_budget_ms {
            return Err(ConfigError::invalid(
                "performance.anonymization_reserve_ms",
                format!(
                    "must be below time_budget_ms ({}), got {}",
                    performance.time_budget_ms, performance.anonymization_reserve_ms
                ),
            ));
        }
        if self.model_base_path.as_os_str().is_empty() {
            return Err(ConfigError::invalid("model_base_path", "must not be empty"));
        }

        Ok(())
    }

    /// Detectors the orchestrator schedules.
    pub fn scheduled_detectors(&self) -> Vec<DetectorType> {
        self.detectors.scheduled()
    }
}
