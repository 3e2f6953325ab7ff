//! ONNX Runtime session loader.
//!
//! Uses ONNX Runtime for inference with explicit execution provider
//! selection:
//! - CUDA with NVIDIA GPU (when `cuda` feature enabled)
//! - DirectML on Windows
//! - CoreML on macOS
//! - CPU fallback on all platforms

use std::path::Path;
use std::sync::Mutex;

use ndarray::Array4;
use ort::execution_providers::{CPUExecutionProvider, ExecutionProvider};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::{DynValue, Tensor};
use tracing::{debug, info};

use super::backend::{BackendSelector, ExecutionBackend};
use super::session::{InferenceEngine, ModelOutputs, OutputTensor, SessionLoader};
use crate::error::{MediaError, MediaResult};

/// Loads models into ONNX Runtime sessions.
#[derive(Debug, Clone, Default)]
pub struct OrtSessionLoader {
    /// CUDA arena limit in bytes.
    gpu_memory_limit: Option<usize>,
}

impl OrtSessionLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gpu_memory_limit(mut self, limit: Option<usize>) -> Self {
        self.gpu_memory_limit = limit;
        self
    }

    fn builder(&self) -> MediaResult<SessionBuilder> {
        Session::builder()
            .map_err(|e| MediaError::internal(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| MediaError::internal(format!("Failed to set optimization level: {}", e)))
    }

    /// Register exactly one execution provider, failing if it cannot
    /// initialize.
    fn with_backend(&self, builder: SessionBuilder, backend: ExecutionBackend) -> MediaResult<SessionBuilder> {
        let registered = match backend {
            ExecutionBackend::Cuda => {
                use ort::execution_providers::CUDAExecutionProvider;
                let mut cuda = CUDAExecutionProvider::default();
                if let Some(limit) = self.gpu_memory_limit {
                    cuda = cuda.with_memory_limit(limit);
                }
                builder.with_execution_providers([cuda.build().error_on_failure()])
            }
            ExecutionBackend::DirectMl => {
                use ort::execution_providers::DirectMLExecutionProvider;
                builder.with_execution_providers([DirectMLExecutionProvider::default()
                    .build()
                    .error_on_failure()])
            }
            ExecutionBackend::CoreMl => {
                use ort::execution_providers::CoreMLExecutionProvider;
                builder.with_execution_providers([CoreMLExecutionProvider::default()
                    .build()
                    .error_on_failure()])
            }
            ExecutionBackend::Cpu => {
                builder.with_execution_providers([CPUExecutionProvider::default().build()])
            }
        };

        registered.map_err(|e| {
            MediaError::internal(format!("{} execution provider unavailable: {}", backend, e))
        })
    }

    fn is_available(backend: ExecutionBackend) -> bool {
        use ort::execution_providers::{
            CUDAExecutionProvider, CoreMLExecutionProvider, DirectMLExecutionProvider,
        };

        let available = match backend {
            ExecutionBackend::Cuda => CUDAExecutionProvider::default().is_available(),
            ExecutionBackend::DirectMl => DirectMLExecutionProvider::default().is_available(),
            ExecutionBackend::CoreMl => CoreMLExecutionProvider::default().is_available(),
            ExecutionBackend::Cpu => return true,
        };
        available.unwrap_or(false)
    }
}

impl SessionLoader for OrtSessionLoader {
    fn load(&self, model_path: &Path, backend: ExecutionBackend) -> MediaResult<Box<dyn InferenceEngine>> {
        let model_bytes = std::fs::read(model_path)
            .map_err(|e| MediaError::internal(format!("Failed to read model file: {}", e)))?;

        let session = self
            .with_backend(self.builder()?, backend)?
            .commit_from_memory(&model_bytes)
            .map_err(|e| {
                MediaError::model_load(
                    model_path.display().to_string(),
                    format!("Failed to load ONNX model on {}: {}", backend, e),
                )
            })?;

        let engine = OrtEngine::new(session);
        info!(
            model_path = %model_path.display(),
            backend = %backend,
            input_shape = ?engine.input_shape,
            outputs = ?engine.output_names,
            "ONNX session created"
        );

        Ok(Box::new(engine))
    }

    fn available_backends(&self) -> Vec<ExecutionBackend> {
        let probe = BackendSelector::probe(Self::is_available);
        probe.log();
        probe.order
    }
}

/// ONNX Runtime session behind a mutex; `Session::run` needs `&mut`.
struct OrtEngine {
    session: Mutex<Session>,
    input_shape: Vec<i64>,
    output_names: Vec<String>,
}

impl OrtEngine {
    fn new(session: Session) -> Self {
        let input_shape = session
            .inputs
            .first()
            .and_then(|input| input.input_type.tensor_shape())
            .map(|shape| shape.iter().copied().collect())
            .unwrap_or_default();
        let output_names = session.outputs.iter().map(|o| o.name.clone()).collect();

        Self {
            session: Mutex::new(session),
            input_shape,
            output_names,
        }
    }
}

impl InferenceEngine for OrtEngine {
    fn run(&self, input: Array4<f32>) -> MediaResult<ModelOutputs> {
        let shape = input.shape().to_vec();
        let data = input.as_standard_layout().iter().copied().collect::<Vec<f32>>();
        let value = Tensor::from_array((shape, data.into_boxed_slice()))
            .map(DynValue::from)
            .map_err(|e| MediaError::internal(format!("Failed to create tensor: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| MediaError::internal("Session lock poisoned"))?;

        let outputs = session
            .run(ort::inputs![value])
            .map_err(|e| MediaError::detection_failed(format!("ONNX inference failed: {}", e)))?;

        let mut result = ModelOutputs::new();
        for name in &self.output_names {
            let Some(output) = outputs.get(name.as_str()) else {
                continue;
            };
            let (shape, data) = output
                .try_extract_tensor::<f32>()
                .map_err(|e| MediaError::detection_failed(format!("Failed to extract tensor {}: {}", name, e)))?;
            let shape = shape.iter().map(|&d| d.max(0) as usize).collect();
            result.push(name.clone(), OutputTensor::new(shape, data.to_vec())?);
        }

        debug!(outputs = result.len(), "Inference completed");
        Ok(result)
    }

    fn input_shape(&self) -> &[i64] {
        &self.input_shape
    }

    fn output_names(&self) -> &[String] {
        &self.output_names
    }
}
