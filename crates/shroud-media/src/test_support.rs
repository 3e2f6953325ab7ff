//! In-memory inference fakes shared by unit tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use ndarray::Array4;
use shroud_models::{DetectorType, PrivacyLevel};

use crate::error::{MediaError, MediaResult};
use crate::registry::{
    ExecutionBackend, InferenceEngine, ModelCatalog, ModelKey, ModelOutputs, OutputTensor,
    SessionLoader,
};

/// Create a model directory holding every catalog artifact.
pub fn write_model_files() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let catalog = ModelCatalog::new(dir.path());
    for &detector in DetectorType::ALL {
        for &level in PrivacyLevel::ALL {
            let path = catalog.path_for(ModelKey::new(detector, level));
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, vec![0u8; 2048]).unwrap();
        }
    }
    dir
}

/// What a fake engine does when run.
#[derive(Debug, Clone, Default)]
pub struct EngineScript {
    pub outputs: Vec<(String, OutputTensor)>,
    pub fail: bool,
    pub panic: bool,
    pub delay: Option<Duration>,
}

impl EngineScript {
    pub fn returning(outputs: Vec<(&str, Vec<usize>, Vec<f32>)>) -> Self {
        Self {
            outputs: outputs
                .into_iter()
                .map(|(name, shape, data)| (name.to_string(), OutputTensor::new(shape, data).unwrap()))
                .collect(),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn panicking() -> Self {
        Self {
            panic: true,
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

pub struct ScriptedEngine {
    script: EngineScript,
    output_names: Vec<String>,
}

impl InferenceEngine for ScriptedEngine {
    fn run(&self, _input: Array4<f32>) -> MediaResult<ModelOutputs> {
        if let Some(delay) = self.script.delay {
            std::thread::sleep(delay);
        }
        if self.script.panic {
            panic!("scripted engine panic");
        }
        if self.script.fail {
            return Err(MediaError::detection_failed("scripted inference failure"));
        }
        Ok(self.script.outputs.iter().cloned().collect())
    }

    fn input_shape(&self) -> &[i64] {
        &[1, 3, -1, -1]
    }

    fn output_names(&self) -> &[String] {
        &self.output_names
    }
}

/// Loader handing out scripted engines keyed by detector.
#[derive(Default)]
pub struct FakeLoader {
    scripts: HashMap<DetectorType, EngineScript>,
    backends: Vec<ExecutionBackend>,
    failing_backends: Vec<ExecutionBackend>,
    failing_detectors: Vec<DetectorType>,
    load_delay: Option<Duration>,
    loads: AtomicUsize,
    active_loads: AtomicUsize,
    peak_loads: AtomicUsize,
    attempts: Mutex<Vec<ExecutionBackend>>,
}

impl FakeLoader {
    pub fn new() -> Self {
        Self {
            backends: vec![ExecutionBackend::Cpu],
            ..Default::default()
        }
    }

    pub fn with_script(mut self, detector: DetectorType, script: EngineScript) -> Self {
        self.scripts.insert(detector, script);
        self
    }

    pub fn with_backends(mut self, backends: Vec<ExecutionBackend>) -> Self {
        self.backends = backends;
        self
    }

    pub fn failing_backend(mut self, backend: ExecutionBackend) -> Self {
        self.failing_backends.push(backend);
        self
    }

    pub fn failing_load(mut self, detector: DetectorType) -> Self {
        self.failing_detectors.push(detector);
        self
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    /// Most loads observed running at the same time.
    pub fn peak_concurrent_loads(&self) -> usize {
        self.peak_loads.load(Ordering::SeqCst)
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn attempts(&self) -> Vec<ExecutionBackend> {
        self.attempts.lock().unwrap().clone()
    }
}

impl SessionLoader for FakeLoader {
    fn load(&self, model_path: &Path, backend: ExecutionBackend) -> MediaResult<Box<dyn InferenceEngine>> {
        self.attempts.lock().unwrap().push(backend);
        if self.failing_backends.contains(&backend) {
            return Err(MediaError::internal(format!("{backend} unavailable")));
        }

        let detector = ModelCatalog::detector_for_path(model_path)
            .ok_or_else(|| MediaError::internal("unknown model path"))?;
        if self.failing_detectors.contains(&detector) {
            return Err(MediaError::model_load(detector.as_str(), "scripted load failure"));
        }

        let active = self.active_loads.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_loads.fetch_max(active, Ordering::SeqCst);
        if let Some(delay) = self.load_delay {
            std::thread::sleep(delay);
        }
        self.active_loads.fetch_sub(1, Ordering::SeqCst);

        self.loads.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.get(&detector).cloned().unwrap_or_default();
        let output_names = script.outputs.iter().map(|(name, _)| name.clone()).collect();
        Ok(Box::new(ScriptedEngine {
            script,
            output_names,
        }))
    }

    fn available_backends(&self) -> Vec<ExecutionBackend> {
        self.backends.clone()
    }
}
