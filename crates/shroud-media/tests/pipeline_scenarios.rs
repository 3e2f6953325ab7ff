//! End-to-end scenarios run against scripted inference engines.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::{Rgb, RgbImage};
use ndarray::Array4;
use shroud_media::{
    AnonymizationEngine, AnonymizationStatus, BoundingBox, Detection, DetectionResult, DetectorToggles,
    DetectorType, ExecutionBackend, InferenceEngine, MediaError, MediaResult, ModelCatalog, ModelKey,
    ModelOutputs, ModelRegistry, OutputTensor, PrivacyConfig, PrivacyLevel, PrivacyPipeline,
    ProcessingContext, RedactionConfig, RedactionMode, RegionType, RegistryConfig, SessionLoader,
};

// =============================================================================
// Scripted inference
// =============================================================================

#[derive(Clone)]
enum Behaviour {
    Return(Vec<(String, OutputTensor)>),
    Fail,
}

struct ScriptedEngine {
    behaviour: Behaviour,
    names: Vec<String>,
}

impl InferenceEngine for ScriptedEngine {
    fn run(&self, _input: Array4<f32>) -> MediaResult<ModelOutputs> {
        match &self.behaviour {
            Behaviour::Return(outputs) => Ok(outputs.iter().cloned().collect()),
            Behaviour::Fail => Err(MediaError::detection_failed("engine crashed")),
        }
    }

    fn input_shape(&self) -> &[i64] {
        &[1, 3, -1, -1]
    }

    fn output_names(&self) -> &[String] {
        &self.names
    }
}

#[derive(Default)]
struct ScriptedLoader {
    behaviours: HashMap<DetectorType, Behaviour>,
    loads: AtomicUsize,
}

impl ScriptedLoader {
    fn with(mut self, detector: DetectorType, behaviour: Behaviour) -> Self {
        self.behaviours.insert(detector, behaviour);
        self
    }
}

impl SessionLoader for ScriptedLoader {
    fn load(&self, model_path: &Path, _backend: ExecutionBackend) -> MediaResult<Box<dyn InferenceEngine>> {
        let detector = ModelCatalog::detector_for_path(model_path)
            .ok_or_else(|| MediaError::internal("unexpected model path"))?;
        self.loads.fetch_add(1, Ordering::SeqCst);

        let behaviour = self
            .behaviours
            .get(&detector)
            .cloned()
            .unwrap_or(Behaviour::Return(Vec::new()));
        let names = match &behaviour {
            Behaviour::Return(outputs) => outputs.iter().map(|(name, _)| name.clone()).collect(),
            Behaviour::Fail => Vec::new(),
        };
        Ok(Box::new(ScriptedEngine { behaviour, names }))
    }
}

fn tensor(name: &str, shape: Vec<usize>, data: Vec<f32>) -> (String, OutputTensor) {
    (name.to_string(), OutputTensor::new(shape, data).unwrap())
}

fn model_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let catalog = ModelCatalog::new(dir.path());
    for &detector in DetectorType::ALL {
        for &level in PrivacyLevel::ALL {
            let path = catalog.path_for(ModelKey::new(detector, level));
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, vec![1u8; 4096]).unwrap();
        }
    }
    dir
}

fn photo(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 251) as u8, (y * 11 % 241) as u8, ((x + y) % 199) as u8 + 30])
    })
}

fn face_context(width: u32, height: u32, boxes: &[BoundingBox]) -> ProcessingContext {
    let mut context = ProcessingContext::new(Arc::new(photo(width, height)));
    context.insert(
        DetectorType::FaceDetection,
        DetectionResult::new(boxes.iter().map(|b| Detection::new(*b, 0.9, "face")).collect()),
    );
    context
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn scenario_single_face_black_box() {
    let context = face_context(640, 480, &[BoundingBox::new(100, 100, 200, 200)]);
    let original = context.image().clone();
    let engine = AnonymizationEngine::new(RedactionConfig {
        face_mode: RedactionMode::BlackBox,
        ..RedactionConfig::default()
    });

    let result = engine.anonymize(&context);
    assert_eq!(result.status, AnonymizationStatus::Success);
    assert_eq!(result.regions_processed, 1);

    let expanded = BoundingBox::new(95, 95, 205, 205);
    let image = result.into_transmittable().unwrap();
    for (x, y, pixel) in image.enumerate_pixels() {
        if expanded.contains_pixel(x, y) {
            assert_eq!(pixel, &Rgb([0, 0, 0]), "({x}, {y}) should be black");
        } else {
            assert_eq!(pixel, original.get_pixel(x, y), "({x}, {y}) should be untouched");
        }
    }
}

#[test]
fn scenario_overlapping_faces_merge() {
    let context = face_context(
        640,
        480,
        &[BoundingBox::new(50, 50, 150, 150), BoundingBox::new(120, 120, 200, 200)],
    );
    let engine = AnonymizationEngine::new(RedactionConfig {
        face_mode: RedactionMode::BlackBox,
        expansion_factor: 1.0,
        ..RedactionConfig::default()
    });

    let result = engine.anonymize(&context);
    assert_eq!(result.regions_processed, 1);
    assert_eq!(result.by_type[&RegionType::Face], 1);

    let image = result.image.unwrap();
    let merged = BoundingBox::new(50, 50, 200, 200);
    for (x, y, pixel) in image.enumerate_pixels() {
        assert_eq!(pixel == &Rgb([0, 0, 0]), merged.contains_pixel(x, y), "({x}, {y})");
    }
}

#[tokio::test]
async fn scenario_lru_eviction_and_reload() {
    let dir = model_dir();
    let loader = Arc::new(ScriptedLoader::default());
    let registry = ModelRegistry::new(
        ModelCatalog::new(dir.path()),
        loader.clone(),
        RegistryConfig {
            capacity: 2,
            ..RegistryConfig::default()
        },
    );

    let a = ModelKey::new(DetectorType::FaceDetection, PrivacyLevel::Balanced);
    let b = ModelKey::new(DetectorType::ObjectDetection, PrivacyLevel::Balanced);
    let c = ModelKey::new(DetectorType::TextDetection, PrivacyLevel::Balanced);

    for key in [a, b, c] {
        let lease = registry.get_model(key.detector, key.level).await.unwrap();
        assert_eq!(lease.key(), key);
    }

    let resident = registry.resident_keys();
    assert_eq!(resident.len(), 2);
    assert!(!resident.contains(&a));
    assert_eq!(loader.loads.load(Ordering::SeqCst), 3);

    registry.get_model(a.detector, a.level).await.unwrap();
    assert_eq!(loader.loads.load(Ordering::SeqCst), 4);
    assert!(registry.resident_keys().contains(&a));
    assert!(!registry.resident_keys().contains(&b));
}

#[tokio::test]
async fn scenario_failed_detector_is_absent() {
    let dir = model_dir();
    let loader = ScriptedLoader::default()
        .with(
            DetectorType::FaceDetection,
            Behaviour::Return(vec![
                tensor("scores", vec![1, 1, 2], vec![0.01, 0.99]),
                tensor("boxes", vec![1, 1, 4], vec![0.25, 0.25, 0.5, 0.5]),
            ]),
        )
        .with(DetectorType::ObjectDetection, Behaviour::Fail);

    let mut config = PrivacyConfig {
        model_base_path: dir.path().to_path_buf(),
        detectors: DetectorToggles {
            face: true,
            object: true,
            text: false,
            pii: false,
        },
        ..PrivacyConfig::default()
    };
    config.redaction.face_mode = RedactionMode::BlackBox;
    config.redaction.expansion_factor = 1.0;

    let pipeline = PrivacyPipeline::with_loader(config, Arc::new(loader)).unwrap();
    pipeline.initialize().await.unwrap();

    let original = Arc::new(photo(256, 256));
    let result = pipeline.process_image(original.clone(), PrivacyLevel::Balanced).await;

    assert_eq!(result.status, AnonymizationStatus::Success);
    assert_eq!(result.detectors_run, vec![DetectorType::FaceDetection]);
    assert_eq!(result.detectors_absent, vec![DetectorType::ObjectDetection]);

    let metadata = result.metadata();
    assert_eq!(metadata.by_type["face"], 1);

    let image = result.into_transmittable().unwrap();
    assert_eq!(image.get_pixel(64, 64), &Rgb([0, 0, 0]));
    assert_eq!(image.get_pixel(127, 127), &Rgb([0, 0, 0]));
    assert_eq!(image.get_pixel(200, 200), original.get_pixel(200, 200));

    pipeline.shutdown();
}

#[tokio::test]
async fn scenario_missing_models_leave_detectors_absent() {
    let dir = tempfile::tempdir().unwrap();
    let config = PrivacyConfig {
        model_base_path: dir.path().to_path_buf(),
        ..PrivacyConfig::default()
    };

    let pipeline = PrivacyPipeline::with_loader(config, Arc::new(ScriptedLoader::default())).unwrap();
    let validation = pipeline.initialize().await.unwrap();
    assert!(!validation.is_complete());
    assert_eq!(validation.missing.len(), DetectorType::ALL.len());

    let original = Arc::new(photo(64, 48));
    let result = pipeline.process_image(original.clone(), PrivacyLevel::Balanced).await;
    assert_eq!(result.status, AnonymizationStatus::NoRegions);
    assert!(result.detectors_run.is_empty());
    assert_eq!(result.detectors_absent.len(), DetectorType::ALL.len());
    assert_eq!(result.image.as_ref(), Some(original.as_ref()));
}
