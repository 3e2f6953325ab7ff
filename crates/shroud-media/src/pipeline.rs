//! Pipeline facade.
//!
//! [`PrivacyPipeline`] is the single entry point collaborators use: it owns
//! the model registry, the detection orchestrator and the anonymization
//! engine, and turns an image into an [`AnonymizationResult`].
//!
//! # Example
//!
//! ```ignore
//! let pipeline = PrivacyPipeline::new(PrivacyConfig::load(None)?)?;
//! pipeline.initialize().await?;
//!
//! let result = pipeline.process_image(Arc::new(image), PrivacyLevel::Balanced).await;
//! match result.into_transmittable() {
//!     Some(redacted) => upload(redacted),
//!     None => refuse(),
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use image::imageops::{self, FilterType};
use image::RgbImage;
use shroud_models::PrivacyLevel;
use tracing::{error, info, instrument, warn};

use crate::anonymize::{AnonymizationEngine, AnonymizationResult};
use crate::config::PrivacyConfig;
use crate::detection::{DetectionOrchestrator, OrchestratorBuilder};
use crate::error::{MediaError, MediaResult};
use crate::metrics;
use crate::registry::{
    ModelCatalog, ModelRegistry, ModelValidation, OrtSessionLoader, RegistryConfig, RegistryStats,
    SessionLoader,
};

/// Detects and redacts privacy-sensitive regions of images.
pub struct PrivacyPipeline {
    config: PrivacyConfig,
    registry: Arc<ModelRegistry>,
    orchestrator: DetectionOrchestrator,
    engine: Arc<AnonymizationEngine>,
    shut_down: AtomicBool,
}

impl PrivacyPipeline {
    /// Pipeline backed by ONNX Runtime.
    pub fn new(config: PrivacyConfig) -> MediaResult<Self> {
        let loader = OrtSessionLoader::new()
            .with_gpu_memory_limit(config.performance.gpu_memory_limit_bytes());
        Self::with_loader(config, Arc::new(loader))
    }

    /// Pipeline with a custom session loader.
    pub fn with_loader(config: PrivacyConfig, loader: Arc<dyn SessionLoader>) -> MediaResult<Self> {
        config.validate()?;

        let registry = Arc::new(ModelRegistry::new(
            ModelCatalog::new(&config.model_base_path),
            loader,
            RegistryConfig::from_privacy_config(&config),
        ));
        let orchestrator = OrchestratorBuilder::new(registry.clone(), &config).build()?;
        let engine = Arc::new(AnonymizationEngine::new(config.redaction.clone()));

        info!(
            enabled = config.enabled,
            level = %config.level,
            detectors = ?orchestrator.detectors(),
            time_budget_ms = config.performance.time_budget_ms,
            "Privacy pipeline created"
        );

        Ok(Self {
            config,
            registry,
            orchestrator,
            engine,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &PrivacyConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn registry_stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Check model artifacts and preload sessions for the configured level.
    ///
    /// Missing models are reported, not fatal: their detectors are absent
    /// from every run until the artifacts appear.
    pub async fn initialize(&self) -> MediaResult<ModelValidation> {
        let level = self.config.level;
        let detectors = self.orchestrator.detectors();

        let validation = self.registry.validate_level(level, &detectors);
        if !validation.is_complete() {
            warn!(
                level = %level,
                missing = validation.missing.len(),
                "Some model artifacts are missing; their detectors will be skipped"
            );
        }

        let loaded = self.registry.warm_up(level, &detectors).await;
        info!(
            level = %level,
            loaded,
            backends = ?self.registry.backends(),
            "Privacy pipeline initialized"
        );

        Ok(validation)
    }

    /// Detect and redact privacy-sensitive regions of `image`.
    ///
    /// Never fails outright: problems surface as an `Error` result, which
    /// carries no image.
    #[instrument(skip_all, fields(width = image.width(), height = image.height(), level = %level))]
    pub async fn process_image(&self, image: Arc<RgbImage>, level: PrivacyLevel) -> AnonymizationResult {
        let start = Instant::now();

        let result = match self.run(image, level, start).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Image withheld");
                AnonymizationResult::failed(&e, start.elapsed())
            }
        }
        .with_elapsed(start.elapsed());

        metrics::record_anonymization(result.status, &result.by_type, result.elapsed_ms());

        let budget = self.config.performance.time_budget();
        if result.elapsed > budget {
            warn!(
                elapsed_ms = result.elapsed_ms(),
                budget_ms = budget.as_millis() as u64,
                "Pipeline exceeded its time budget"
            );
        }

        result
    }

    async fn run(&self, image: Arc<RgbImage>, level: PrivacyLevel, start: Instant) -> MediaResult<AnonymizationResult> {
        if !self.config.enabled {
            return Err(MediaError::config("privacy pipeline is disabled"));
        }
        if self.shut_down.load(Ordering::Acquire) {
            return Err(MediaError::internal("privacy pipeline has been shut down"));
        }
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(MediaError::redaction(format!("empty image ({width}x{height})")));
        }

        self.registry.switch_privacy_level(level);
        let deadline = tokio::time::Instant::from_std(start) + self.config.performance.detection_budget();

        let working = self.working_copy(&image).await?;
        let mut context = self.orchestrator.run(working, level, deadline).await;
        context.rescale_to(image);

        // A detector the configuration asks for could not be loaded at all;
        // withhold the image rather than pass it on partially checked.
        if let Some(problem) = context.configuration_error() {
            error!(problem, "Model cache cannot hold every enabled detector");
            let error = MediaError::config(problem.to_string());
            return Ok(AnonymizationResult::failed(&error, start.elapsed()).with_detectors(&context));
        }

        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || engine.anonymize(&context))
            .await
            .map_err(|e| MediaError::internal(format!("anonymization task failed: {e}")))
    }

    /// Downscale images whose longest side exceeds `max_image_size`.
    async fn working_copy(&self, image: &Arc<RgbImage>) -> MediaResult<Arc<RgbImage>> {
        let (width, height) = image.dimensions();
        let max_side = self.config.performance.max_image_size;
        let longest = width.max(height);
        if longest <= max_side {
            return Ok(image.clone());
        }

        let scale = max_side as f64 / longest as f64;
        let target_w = ((width as f64 * scale).round() as u32).max(1);
        let target_h = ((height as f64 * scale).round() as u32).max(1);
        info!(width, height, target_w, target_h, "Downscaling image for detection");

        let source = image.clone();
        let resized = tokio::task::spawn_blocking(move || {
            imageops::resize(source.as_ref(), target_w, target_h, FilterType::Triangle)
        })
        .await
        .map_err(|e| MediaError::internal(format!("resize task failed: {e}")))?;

        Ok(Arc::new(resized))
    }

    /// Release every session. Runs at most once; later calls are no-ops and
    /// later `process_image` calls return `Error`.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.registry.shutdown();
        info!("Privacy pipeline shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl Drop for PrivacyPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
