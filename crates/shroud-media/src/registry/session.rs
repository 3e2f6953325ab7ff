//! Loaded model sessions and the inference seam.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ndarray::{Array4, ArrayViewD, IxDyn};

use super::backend::ExecutionBackend;
use super::catalog::ModelKey;
use crate::error::{MediaError, MediaResult};

/// A dense f32 output tensor copied out of the runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl OutputTensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> MediaResult<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(MediaError::detection_failed(format!(
                "output shape {:?} needs {} values, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn view(&self) -> MediaResult<ArrayViewD<'_, f32>> {
        ArrayViewD::from_shape(IxDyn(&self.shape), &self.data)
            .map_err(|e| MediaError::detection_failed(format!("bad output tensor: {e}")))
    }
}

/// Named outputs of one inference call, in model output order.
#[derive(Debug, Clone, Default)]
pub struct ModelOutputs {
    tensors: Vec<(String, OutputTensor)>,
}

impl ModelOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, tensor: OutputTensor) {
        self.tensors.push((name.into(), tensor));
    }

    pub fn get(&self, name: &str) -> Option<&OutputTensor> {
        self.tensors
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, tensor)| tensor)
    }

    /// Output by name, falling back to position for exports that rename
    /// their outputs.
    pub fn get_or_index(&self, name: &str, index: usize) -> MediaResult<&OutputTensor> {
        self.get(name)
            .or_else(|| self.tensors.get(index).map(|(_, tensor)| tensor))
            .ok_or_else(|| {
                MediaError::detection_failed(format!("model output '{name}' (#{index}) missing"))
            })
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

impl FromIterator<(String, OutputTensor)> for ModelOutputs {
    fn from_iter<I: IntoIterator<Item = (String, OutputTensor)>>(iter: I) -> Self {
        Self {
            tensors: iter.into_iter().collect(),
        }
    }
}

/// A loaded model bound to one execution backend.
///
/// Implementations must be callable from several blocking threads at once.
pub trait InferenceEngine: Send + Sync {
    /// Run the model on one NCHW input batch.
    fn run(&self, input: Array4<f32>) -> MediaResult<ModelOutputs>;

    /// Declared input shape; dynamic axes are `-1`.
    fn input_shape(&self) -> &[i64];

    fn output_names(&self) -> &[String];
}

/// Creates engines from model artifacts.
pub trait SessionLoader: Send + Sync {
    /// Load `model_path` on `backend`. Must fail rather than silently fall
    /// back to another backend.
    fn load(&self, model_path: &Path, backend: ExecutionBackend) -> MediaResult<Box<dyn InferenceEngine>>;

    /// Backends this loader can target, best first, ending with CPU.
    fn available_backends(&self) -> Vec<ExecutionBackend> {
        vec![ExecutionBackend::Cpu]
    }
}

/// A resident model session.
pub struct ModelSession {
    key: ModelKey,
    engine: Box<dyn InferenceEngine>,
    backend: ExecutionBackend,
    model_path: PathBuf,
    load_duration: Duration,
    loaded_at: Instant,
    last_used: AtomicU64,
    checkouts: AtomicUsize,
}

impl ModelSession {
    pub fn new(
        key: ModelKey,
        engine: Box<dyn InferenceEngine>,
        backend: ExecutionBackend,
        model_path: PathBuf,
        load_duration: Duration,
    ) -> Self {
        Self {
            key,
            engine,
            backend,
            model_path,
            load_duration,
            loaded_at: Instant::now(),
            last_used: AtomicU64::new(0),
            checkouts: AtomicUsize::new(0),
        }
    }

    pub fn key(&self) -> ModelKey {
        self.key
    }

    pub fn backend(&self) -> ExecutionBackend {
        self.backend
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn load_duration(&self) -> Duration {
        self.load_duration
    }

    pub fn age(&self) -> Duration {
        self.loaded_at.elapsed()
    }

    pub fn input_shape(&self) -> &[i64] {
        self.engine.input_shape()
    }

    pub fn output_names(&self) -> &[String] {
        self.engine.output_names()
    }

    /// Logical timestamp of the last checkout.
    pub fn last_used(&self) -> u64 {
        self.last_used.load(Ordering::Acquire)
    }

    pub(crate) fn touch(&self, tick: u64) {
        self.last_used.fetch_max(tick, Ordering::AcqRel);
    }

    pub fn checkouts(&self) -> usize {
        self.checkouts.load(Ordering::Acquire)
    }

    pub fn is_idle(&self) -> bool {
        self.checkouts() == 0
    }

    pub fn run(&self, input: Array4<f32>) -> MediaResult<ModelOutputs> {
        self.engine.run(input)
    }
}

impl std::fmt::Debug for ModelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSession")
            .field("key", &self.key)
            .field("backend", &self.backend)
            .field("model_path", &self.model_path)
            .field("load_duration", &self.load_duration)
            .field("last_used", &self.last_used())
            .field("checkouts", &self.checkouts())
            .finish()
    }
}

/// A checked-out session. The session cannot be evicted while any lease on
/// it is alive; dropping the lease checks it back in.
#[derive(Debug)]
pub struct SessionLease {
    session: Arc<ModelSession>,
}

impl SessionLease {
    pub(crate) fn checkout(session: Arc<ModelSession>) -> Self {
        session.checkouts.fetch_add(1, Ordering::AcqRel);
        Self { session }
    }

    pub fn session(&self) -> &Arc<ModelSession> {
        &self.session
    }
}

impl Clone for SessionLease {
    fn clone(&self) -> Self {
        Self::checkout(self.session.clone())
    }
}

impl Deref for SessionLease {
    type Target = ModelSession;

    fn deref(&self) -> &ModelSession {
        &self.session
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.session.checkouts.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_models::{DetectorType, PrivacyLevel};

    struct NullEngine;

    impl InferenceEngine for NullEngine {
        fn run(&self, _input: Array4<f32>) -> MediaResult<ModelOutputs> {
            Ok(ModelOutputs::new())
        }

        fn input_shape(&self) -> &[i64] {
            &[1, 3, -1, -1]
        }

        fn output_names(&self) -> &[String] {
            &[]
        }
    }

    fn session() -> Arc<ModelSession> {
        Arc::new(ModelSession::new(
            ModelKey::new(DetectorType::FaceDetection, PrivacyLevel::Balanced),
            Box::new(NullEngine),
            ExecutionBackend::Cpu,
            PathBuf::from("face.onnx"),
            Duration::from_millis(5),
        ))
    }

    #[test]
    fn test_lease_checks_in_on_drop() {
        let session = session();
        assert!(session.is_idle());

        let lease = SessionLease::checkout(session.clone());
        let second = lease.clone();
        assert_eq!(session.checkouts(), 2);

        drop(lease);
        assert_eq!(session.checkouts(), 1);
        drop(second);
        assert!(session.is_idle());
    }

    #[test]
    fn test_touch_is_monotonic() {
        let session = session();
        session.touch(7);
        session.touch(3);
        assert_eq!(session.last_used(), 7);
    }

    #[test]
    fn test_outputs_lookup() {
        let mut outputs = ModelOutputs::new();
        outputs.push("scores", OutputTensor::new(vec![1, 2], vec![0.1, 0.9]).unwrap());
        outputs.push("boxes", OutputTensor::new(vec![1, 4], vec![0.0; 4]).unwrap());

        assert_eq!(outputs.get_or_index("boxes", 0).unwrap().shape, vec![1, 4]);
        assert_eq!(outputs.get_or_index("renamed", 0).unwrap().shape, vec![1, 2]);
        assert!(outputs.get_or_index("missing", 5).is_err());
        assert!(OutputTensor::new(vec![2, 2], vec![0.0; 3]).is_err());
    }
}
