//! Concurrent detector scheduling.
//!
//! Detectors run in two waves. Wave 1 (face, object, text) has no
//! dependencies; wave 2 (PII) reads the text regions of wave 1. Within a
//! wave every detector runs concurrently with inference on the blocking
//! pool. A detector that fails to load, errors, panics or misses the
//! deadline is recorded as absent; the others are unaffected.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use image::RgbImage;
use shroud_models::{DetectionResult, DetectorType, PrivacyLevel};
use tracing::{debug, error, info, instrument, warn};

use super::context::ProcessingContext;
use super::nodes::DetectionNode;
use super::NodeInput;
use crate::config::PrivacyConfig;
use crate::error::{MediaError, MediaResult};
use crate::metrics;
use crate::registry::ModelRegistry;

/// Builder for a [`DetectionOrchestrator`].
///
/// # Example
///
/// ```ignore
/// let orchestrator = OrchestratorBuilder::new(registry, &config)
///     .detectors([DetectorType::FaceDetection, DetectorType::PiiAnalysis])
///     .build()?;
/// ```
pub struct OrchestratorBuilder {
    registry: Arc<ModelRegistry>,
    config: PrivacyConfig,
    detectors: BTreeSet<DetectorType>,
    custom: Vec<DetectionNode>,
}

impl OrchestratorBuilder {
    /// Start from the detectors enabled in `config`.
    pub fn new(registry: Arc<ModelRegistry>, config: &PrivacyConfig) -> Self {
        Self {
            registry,
            config: config.clone(),
            detectors: config.scheduled_detectors().into_iter().collect(),
            custom: Vec::new(),
        }
    }

    /// Replace the detector set.
    pub fn detectors(mut self, detectors: impl IntoIterator<Item = DetectorType>) -> Self {
        self.detectors = detectors.into_iter().collect();
        self
    }

    /// Use a custom-tuned node instead of the default one for its detector.
    pub fn node(mut self, node: DetectionNode) -> Self {
        self.detectors.insert(node.detector_type());
        self.custom.retain(|n| n.detector_type() != node.detector_type());
        self.custom.push(node);
        self
    }

    pub fn build(self) -> MediaResult<DetectionOrchestrator> {
        let mut detectors = self.detectors.clone();
        for detector in &self.detectors {
            for dependency in detector.dependencies() {
                if detectors.insert(*dependency) {
                    info!(
                        detector = %detector,
                        dependency = %dependency,
                        "Scheduling dependency of enabled detector"
                    );
                }
            }
        }

        let mut nodes = Vec::with_capacity(detectors.len());
        for detector in detectors {
            let node = match self.custom.iter().find(|n| n.detector_type() == detector) {
                Some(node) => node.clone(),
                None => DetectionNode::for_detector(detector, &self.config, self.registry.catalog())?,
            };
            nodes.push(Arc::new(node));
        }
        nodes.sort_by_key(|n| (n.detector_type().wave(), n.detector_type()));

        info!(
            detectors = ?nodes.iter().map(|n| n.detector_type().as_str()).collect::<Vec<_>>(),
            "Detection orchestrator built"
        );

        Ok(DetectionOrchestrator {
            registry: self.registry,
            nodes,
        })
    }
}

/// Runs detection nodes over one image.
pub struct DetectionOrchestrator {
    registry: Arc<ModelRegistry>,
    nodes: Vec<Arc<DetectionNode>>,
}

impl DetectionOrchestrator {
    /// Orchestrator for the detectors enabled in `config`.
    pub fn from_config(registry: Arc<ModelRegistry>, config: &PrivacyConfig) -> MediaResult<Self> {
        OrchestratorBuilder::new(registry, config).build()
    }

    /// Scheduled detectors, in run order.
    pub fn detectors(&self) -> Vec<DetectorType> {
        self.nodes.iter().map(|n| n.detector_type()).collect()
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Run every scheduled detector over `image`, cancelling what is still
    /// running at `deadline`.
    #[instrument(skip_all, fields(level = %level, width = image.width(), height = image.height()))]
    pub async fn run(
        &self,
        image: Arc<RgbImage>,
        level: PrivacyLevel,
        deadline: tokio::time::Instant,
    ) -> ProcessingContext {
        let mut context = ProcessingContext::new(image.clone());
        let last_wave = self
            .nodes
            .iter()
            .map(|n| n.detector_type().wave())
            .max()
            .unwrap_or(0);

        for wave in 0..=last_wave {
            let mut tasks = Vec::new();

            for node in self.nodes.iter().filter(|n| n.detector_type().wave() == wave) {
                let detector = node.detector_type();
                let mut input = NodeInput::new(image.clone(), level);
                let mut missing = None;

                for &dependency in detector.dependencies() {
                    match context.get(dependency) {
                        Some(result) => {
                            input.upstream.insert(dependency, result.clone());
                        }
                        None => {
                            missing = Some(dependency);
                            break;
                        }
                    }
                }

                if let Some(dependency) = missing {
                    debug!(detector = %detector, dependency = %dependency, "Skipping detector");
                    metrics::record_detector_failure(detector, "dependency");
                    context.record_absent(detector, format!("dependency {dependency} unavailable"));
                    continue;
                }

                tasks.push(self.run_node(node.clone(), input, deadline));
            }

            for (detector, outcome) in join_all(tasks).await {
                match outcome {
                    Ok(result) => context.insert(detector, result),
                    Err(e) => {
                        if matches!(e, MediaError::RegistryCapacity { .. }) {
                            error!(detector = %detector, error = %e, "Detector skipped: model cache exhausted");
                        } else {
                            warn!(detector = %detector, error = %e, "Detector absent for this image");
                        }
                        metrics::record_detector_failure(detector, e.reason());
                        context.record_failure(detector, &e);
                    }
                }
            }
        }

        debug!(
            run = ?context.detectors_run(),
            absent = ?context.detectors_absent(),
            detections = context.total_detections(),
            "Detection finished"
        );
        context
    }

    async fn run_node(
        &self,
        node: Arc<DetectionNode>,
        input: NodeInput,
        deadline: tokio::time::Instant,
    ) -> (DetectorType, MediaResult<DetectionResult>) {
        let detector = node.detector_type();
        let registry = self.registry.clone();
        let started = Instant::now();

        let work = async move {
            let lease = registry.get_model(detector, input.level).await?;
            // The lease moves into the blocking task, so it is checked back in
            // when inference finishes even if this future is cancelled.
            tokio::task::spawn_blocking(move || {
                let inference_start = Instant::now();
                node.detect(&input, &lease)
                    .map(|r| r.with_inference_ms(inference_start.elapsed().as_secs_f64() * 1000.0))
            })
            .await
            .map_err(|e| MediaError::detection_failed(format!("{detector} task failed: {e}")))?
        };

        let outcome = match tokio::time::timeout_at(deadline, work).await {
            Ok(outcome) => outcome,
            Err(_) => Err(MediaError::DetectionTimeout {
                detector,
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
        };

        if let Ok(result) = &outcome {
            metrics::record_detector_run(detector, result.inference_ms);
            debug!(
                detector = %detector,
                detections = result.len(),
                inference_ms = result.inference_ms,
                "Detector finished"
            );
        }

        (detector, outcome)
    }
}
