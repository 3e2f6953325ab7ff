//! Worker configuration.

use std::path::PathBuf;

use shroud_models::PrivacyLevel;

/// Worker configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Pipeline config file (TOML/YAML/JSON); `SHROUD__*` variables still apply.
    pub config_path: Option<PathBuf>,
    /// Directory redacted images are written to
    pub output_dir: PathBuf,
    /// Privacy level override; the pipeline config's level when unset
    pub level: Option<PrivacyLevel>,
    /// Write a JSON report next to each redacted image
    pub write_metadata: bool,
    /// Install the Prometheus recorder and log a snapshot on exit
    pub metrics: bool,
    /// Files redacted concurrently
    pub max_concurrent_files: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            output_dir: PathBuf::from("./redacted"),
            level: None,
            write_metadata: true,
            metrics: false,
            max_concurrent_files: 2,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from any key lookup; unparseable values fall back to
    /// defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| {
            lookup(key)
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(default)
        };

        Self {
            config_path: lookup("SHROUD_CONFIG")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            output_dir: lookup("SHROUD_OUTPUT_DIR")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            level: lookup("SHROUD_LEVEL").and_then(|s| s.parse().ok()),
            write_metadata: flag("SHROUD_WRITE_METADATA", defaults.write_metadata),
            metrics: flag("SHROUD_METRICS", defaults.metrics),
            max_concurrent_files: lookup("SHROUD_MAX_CONCURRENT")
                .and_then(|s| s.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.max_concurrent_files),
        }
    }
}
