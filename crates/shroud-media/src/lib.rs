#![deny(unreachable_patterns)]
//! On-device privacy preprocessing for images.
//!
//! This crate provides:
//! - A model registry with LRU session caching and execution backend fallback
//! - Face, object, text and PII detection nodes on ONNX Runtime
//! - A deadline-bounded orchestrator running detectors concurrently
//! - An anonymization engine that merges regions and redacts them (blur,
//!   pixelate, black box), failing closed
//! - The `PrivacyPipeline` facade tying them together

pub mod anonymize;
pub mod config;
pub mod detection;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod registry;

#[cfg(test)]
mod test_support;

pub use anonymize::{AnonymizationEngine, AnonymizationResult, MergedRegion};
pub use config::{ConfigError, DetectorToggles, PerformanceConfig, PrivacyConfig, RedactionConfig};
pub use detection::{DetectionNode, DetectionOrchestrator, OrchestratorBuilder, ProcessingContext};
pub use error::{MediaError, MediaResult};
pub use pipeline::PrivacyPipeline;
pub use registry::{
    ExecutionBackend, InferenceEngine, ModelCatalog, ModelKey, ModelOutputs, ModelRegistry, ModelSession,
    ModelValidation, OrtSessionLoader, OutputTensor, RegistryConfig, RegistryStats, SessionLease,
    SessionLoader,
};

// Shared data model, re-exported for collaborators that only depend on this crate.
pub use shroud_models::{
    AnonymizationMetadata, AnonymizationStatus, BoundingBox, Detection, DetectionResult, DetectorType,
    PrivacyLevel, RedactionMode, RegionType,
};
