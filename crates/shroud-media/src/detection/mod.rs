//! Detection: nodes, their inputs and the orchestrator that runs them.
//!
//! # Architecture
//!
//! - `nodes` - one variant per detector type (face, object, text, PII)
//! - `orchestrator` - runs enabled nodes concurrently in two waves under a
//!   deadline and collects a `ProcessingContext`
//! - `preprocess` / `postprocess` - tensor layout and NMS shared by nodes

mod context;
pub mod nodes;
mod orchestrator;
pub mod postprocess;
pub mod preprocess;

pub use context::ProcessingContext;
pub use nodes::DetectionNode;
pub use orchestrator::{DetectionOrchestrator, OrchestratorBuilder};

use std::collections::HashMap;
use std::sync::Arc;

use image::RgbImage;
use shroud_models::{DetectionResult, DetectorType, PrivacyLevel};

/// Everything a node reads for one run.
#[derive(Debug, Clone)]
pub struct NodeInput {
    pub image: Arc<RgbImage>,
    pub level: PrivacyLevel,
    /// Results of the node's dependencies.
    pub upstream: HashMap<DetectorType, DetectionResult>,
}

impl NodeInput {
    pub fn new(image: Arc<RgbImage>, level: PrivacyLevel) -> Self {
        Self {
            image,
            level,
            upstream: HashMap::new(),
        }
    }

    pub fn with_upstream(mut self, detector: DetectorType, result: DetectionResult) -> Self {
        self.upstream.insert(detector, result);
        self
    }
}
