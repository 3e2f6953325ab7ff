//! Redaction mode definitions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Visual anonymization technique applied to a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum RedactionMode {
    /// Gaussian blur.
    #[default]
    Blur,
    /// Coarse blocks via downscale + nearest-neighbour upscale.
    Pixelate,
    /// Solid black fill.
    BlackBox,
}

impl RedactionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedactionMode::Blur => "blur",
            RedactionMode::Pixelate => "pixelate",
            RedactionMode::BlackBox => "black_box",
        }
    }
}

impl fmt::Display for RedactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RedactionMode {
    type Err = RedactionModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "blur" | "gaussian" => Ok(RedactionMode::Blur),
            "pixelate" | "mosaic" => Ok(RedactionMode::Pixelate),
            "black_box" | "blackbox" | "black" | "fill" => Ok(RedactionMode::BlackBox),
            _ => Err(RedactionModeParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown redaction mode: {0}")]
pub struct RedactionModeParseError(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!("blur".parse::<RedactionMode>().unwrap(), RedactionMode::Blur);
        assert_eq!("Pixelate".parse::<RedactionMode>().unwrap(), RedactionMode::Pixelate);
        assert_eq!("black_box".parse::<RedactionMode>().unwrap(), RedactionMode::BlackBox);
        assert_eq!("blackbox".parse::<RedactionMode>().unwrap(), RedactionMode::BlackBox);
        assert!("smudge".parse::<RedactionMode>().is_err());
    }

    #[test]
    fn test_mode_serde() {
        let mode: RedactionMode = serde_json::from_str("\"black_box\"").unwrap();
        assert_eq!(mode, RedactionMode::BlackBox);
        assert_eq!(RedactionMode::Pixelate.to_string(), "pixelate");
    }
}
