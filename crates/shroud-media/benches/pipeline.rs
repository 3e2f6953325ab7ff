//! Pipeline Benchmarks
//!
//! Measures redaction cost and end-to-end latency with synthetic inference
//! engines, so only preprocessing, postprocessing, merging and redaction are
//! timed.
//!
//! # Running Benchmarks
//! ```bash
//! cargo bench --package shroud-media --bench pipeline
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use image::{Rgb, RgbImage};
use ndarray::Array4;
use shroud_media::detection::nodes::default_charset;
use shroud_media::{
    AnonymizationEngine, BoundingBox, Detection, DetectionResult, DetectorType, ExecutionBackend,
    InferenceEngine, MediaError, MediaResult, ModelCatalog, ModelKey, ModelOutputs, OutputTensor,
    PrivacyConfig, PrivacyLevel, PrivacyPipeline, ProcessingContext, RedactionConfig, RedactionMode,
    SessionLoader,
};

struct FixedEngine {
    outputs: Vec<(String, OutputTensor)>,
    names: Vec<String>,
}

impl InferenceEngine for FixedEngine {
    fn run(&self, _input: Array4<f32>) -> MediaResult<ModelOutputs> {
        Ok(self.outputs.iter().cloned().collect())
    }

    fn input_shape(&self) -> &[i64] {
        &[1, 3, -1, -1]
    }

    fn output_names(&self) -> &[String] {
        &self.names
    }
}

struct SyntheticLoader;

impl SyntheticLoader {
    fn outputs(detector: DetectorType) -> Vec<(String, OutputTensor)> {
        let tensor = |name: &str, shape: Vec<usize>, data: Vec<f32>| {
            (name.to_string(), OutputTensor::new(shape, data).expect("valid tensor"))
        };

        match detector {
            DetectorType::FaceDetection => vec![
                tensor("scores", vec![1, 2, 2], vec![0.05, 0.95, 0.1, 0.9]),
                tensor(
                    "boxes",
                    vec![1, 2, 4],
                    vec![0.10, 0.10, 0.20, 0.30, 0.60, 0.20, 0.70, 0.40],
                ),
            ],
            // Zero scores: no object passes the threshold.
            DetectorType::ObjectDetection => vec![tensor("output0", vec![1, 84, 64], vec![0.0; 84 * 64])],
            DetectorType::TextDetection => {
                let mut map = vec![0.0f32; 160 * 160];
                for y in 100..112 {
                    for x in 20..90 {
                        map[y * 160 + x] = 0.9;
                    }
                }
                vec![tensor("maps", vec![1, 1, 160, 160], map)]
            }
            DetectorType::PiiAnalysis => {
                // "AB12CD" as alternating symbol/blank steps.
                let charset = default_charset();
                let classes = charset.len() + 1;
                let steps: Vec<usize> = "AB12CD"
                    .chars()
                    .flat_map(|ch| {
                        let index = charset.iter().position(|&c| c == ch).map_or(0, |i| i + 1);
                        [index, 0]
                    })
                    .collect();
                let mut probs = vec![0.0f32; steps.len() * classes];
                for (t, &index) in steps.iter().enumerate() {
                    probs[t * classes + index] = 0.9;
                }
                vec![tensor("output", vec![1, steps.len(), classes], probs)]
            }
        }
    }
}

impl SessionLoader for SyntheticLoader {
    fn load(&self, model_path: &Path, _backend: ExecutionBackend) -> MediaResult<Box<dyn InferenceEngine>> {
        let detector = ModelCatalog::detector_for_path(model_path)
            .ok_or_else(|| MediaError::internal("unknown model"))?;
        let outputs = Self::outputs(detector);
        let names = outputs.iter().map(|(name, _)| name.clone()).collect();
        Ok(Box::new(FixedEngine { outputs, names }))
    }
}

fn create_test_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            ((x * 7 + y * 11) % 256) as u8,
            ((x * 13 + y * 17) % 256) as u8,
            ((x * 19 + y * 23) % 256) as u8,
        ])
    })
}

fn write_models(dir: &Path) {
    let catalog = ModelCatalog::new(dir);
    for &detector in DetectorType::ALL {
        for &level in PrivacyLevel::ALL {
            let path = catalog.path_for(ModelKey::new(detector, level));
            std::fs::create_dir_all(path.parent().expect("model dir")).expect("create model dir");
            std::fs::write(&path, vec![0u8; 2048]).expect("write model");
        }
    }
}

/// Benchmark redaction of a fixed set of regions per mode.
fn bench_redaction(c: &mut Criterion) {
    let mut group = c.benchmark_group("redaction");
    group.measurement_time(Duration::from_secs(5));

    let mut context = ProcessingContext::new(Arc::new(create_test_image(1920, 1080)));
    let faces = (0..12u32)
        .map(|i| {
            let x = 40 + i * 150;
            Detection::new(BoundingBox::new(x, 200, x + 120, 360), 0.9, "face")
        })
        .collect();
    context.insert(DetectorType::FaceDetection, DetectionResult::new(faces));

    for mode in [RedactionMode::BlackBox, RedactionMode::Pixelate, RedactionMode::Blur] {
        let engine = AnonymizationEngine::new(RedactionConfig {
            face_mode: mode,
            ..RedactionConfig::default()
        });

        group.throughput(Throughput::Elements(12));
        group.bench_with_input(BenchmarkId::new("faces", mode.as_str()), &context, |b, context| {
            b.iter(|| black_box(engine.anonymize(black_box(context))))
        });
    }

    group.finish();
}

/// Benchmark a full 1920x1080 run at Balanced with every detector enabled.
fn bench_end_to_end(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    group.warm_up_time(Duration::from_secs(2));
    group.measurement_time(Duration::from_secs(10));

    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let dir = tempfile::tempdir().expect("temp dir");
    write_models(dir.path());

    let config = PrivacyConfig {
        model_base_path: dir.path().to_path_buf(),
        ..PrivacyConfig::default()
    };
    let pipeline = PrivacyPipeline::with_loader(config, Arc::new(SyntheticLoader)).expect("pipeline");
    runtime.block_on(pipeline.initialize()).expect("initialize");

    let image = Arc::new(create_test_image(1920, 1080));
    group.throughput(Throughput::Elements(1));
    group.bench_function("1920x1080_balanced", |b| {
        b.iter(|| {
            let result = runtime.block_on(pipeline.process_image(image.clone(), PrivacyLevel::Balanced));
            black_box(result)
        })
    });

    group.finish();
}

criterion_group!(benches, bench_redaction, bench_end_to_end);
criterion_main!(benches);
