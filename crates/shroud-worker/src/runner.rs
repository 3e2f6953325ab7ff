//! File redaction runs.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use shroud_media::PrivacyPipeline;
use shroud_models::{AnonymizationMetadata, AnonymizationStatus, PrivacyLevel};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};

/// Extensions the worker picks up when scanning directories.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "webp", "tif", "tiff"];

/// JSON report written next to a redacted image.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub run_id: Uuid,
    pub source: PathBuf,
    pub output: PathBuf,
    pub level: PrivacyLevel,
    pub processed_at: DateTime<Utc>,
    pub metadata: AnonymizationMetadata,
}

/// What happened to one input file.
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub source: PathBuf,
    pub output: PathBuf,
    pub report: Option<PathBuf>,
    pub status: AnonymizationStatus,
    pub regions: usize,
}

/// Totals of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub redacted: usize,
    pub unchanged: usize,
    pub refused: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.redacted + self.unchanged + self.refused + self.failed
    }

    /// True when every input produced an output.
    pub fn is_clean(&self) -> bool {
        self.refused == 0 && self.failed == 0
    }
}

/// Redacts image files with a shared pipeline.
pub struct ImageRunner {
    pipeline: Arc<PrivacyPipeline>,
    config: WorkerConfig,
    level: PrivacyLevel,
    run_id: Uuid,
}

impl ImageRunner {
    pub fn new(pipeline: Arc<PrivacyPipeline>, config: WorkerConfig) -> Self {
        let level = config.level.unwrap_or(pipeline.config().level);
        Self {
            pipeline,
            config,
            level,
            run_id: Uuid::new_v4(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Redact every file, `max_concurrent_files` at a time.
    pub async fn run(&self, inputs: Vec<PathBuf>) -> WorkerResult<RunSummary> {
        tokio::fs::create_dir_all(&self.config.output_dir).await?;
        info!(
            run_id = %self.run_id,
            files = inputs.len(),
            level = %self.level,
            output_dir = %self.config.output_dir.display(),
            "Starting redaction run"
        );

        let mut summary = RunSummary::default();
        let mut claimed: HashMap<PathBuf, PathBuf> = HashMap::new();
        let mut jobs = Vec::with_capacity(inputs.len());
        for path in inputs {
            let output = match self.output_path(&path) {
                Ok(output) => output,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to process image");
                    summary.failed += 1;
                    continue;
                }
            };
            match claimed.entry(output.clone()) {
                Entry::Occupied(first) => {
                    let e = WorkerError::output_collision(&path, first.get());
                    error!(path = %path.display(), output = %output.display(), error = %e, "Failed to process image");
                    summary.failed += 1;
                }
                Entry::Vacant(slot) => {
                    slot.insert(path.clone());
                    jobs.push((path, output));
                }
            }
        }

        let outcomes: Vec<(PathBuf, WorkerResult<FileOutcome>)> = stream::iter(jobs)
            .map(|(path, output)| async move {
                let outcome = self.redact_into(&path, output).await;
                (path, outcome)
            })
            .buffer_unordered(self.config.max_concurrent_files.max(1))
            .collect()
            .await;

        for (path, outcome) in outcomes {
            match outcome {
                Ok(outcome) if outcome.status == AnonymizationStatus::NoRegions => summary.unchanged += 1,
                Ok(_) => summary.redacted += 1,
                Err(e) if e.is_refusal() => {
                    warn!(path = %path.display(), error = %e, "Image withheld");
                    summary.refused += 1;
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to process image");
                    summary.failed += 1;
                }
            }
        }

        info!(
            run_id = %self.run_id,
            redacted = summary.redacted,
            unchanged = summary.unchanged,
            refused = summary.refused,
            failed = summary.failed,
            "Redaction run finished"
        );
        Ok(summary)
    }

    /// Redact one file. Nothing is written unless the pipeline produced a
    /// transmittable image.
    pub async fn redact_file(&self, path: &Path) -> WorkerResult<FileOutcome> {
        let output = self.output_path(path)?;
        self.redact_into(path, output).await
    }

    async fn redact_into(&self, path: &Path, output: PathBuf) -> WorkerResult<FileOutcome> {
        let source = path.to_path_buf();
        let image = tokio::task::spawn_blocking(move || image::open(&source).map(|img| img.to_rgb8()))
            .await
            .map_err(|e| WorkerError::TaskFailed(format!("decode task failed: {e}")))??;

        let result = self.pipeline.process_image(Arc::new(image), self.level).await;
        let metadata = result.metadata();
        let status = result.status;
        let regions = result.regions_processed;

        let Some(redacted) = result.into_transmittable() else {
            let reason = metadata
                .error
                .unwrap_or_else(|| "pipeline returned no image".to_string());
            return Err(WorkerError::refused(path, reason));
        };

        let target = output.clone();
        tokio::task::spawn_blocking(move || redacted.save(&target))
            .await
            .map_err(|e| WorkerError::TaskFailed(format!("encode task failed: {e}")))??;

        let report = if self.config.write_metadata {
            let report_path = output.with_extension("json");
            let report = FileReport {
                run_id: self.run_id,
                source: path.to_path_buf(),
                output: output.clone(),
                level: self.level,
                processed_at: Utc::now(),
                metadata,
            };
            tokio::fs::write(&report_path, serde_json::to_vec_pretty(&report)?).await?;
            Some(report_path)
        } else {
            None
        };

        info!(
            path = %path.display(),
            output = %output.display(),
            status = %status,
            regions,
            "Image redacted"
        );

        Ok(FileOutcome {
            source: path.to_path_buf(),
            output,
            report,
            status,
            regions,
        })
    }

    /// `<output_dir>/<file name>.redacted.png`; the source extension is kept
    /// so `cam.png` and `cam.jpg` do not share an output.
    pub fn output_path(&self, input: &Path) -> WorkerResult<PathBuf> {
        let name = input
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| WorkerError::unsupported(input, "file name is not valid UTF-8"))?;
        Ok(self.config.output_dir.join(format!("{name}.redacted.png")))
    }
}

/// Expand directories into the image files they contain (non-recursive),
/// keep explicit files as given. Output is sorted and de-duplicated.
pub fn collect_inputs(paths: &[PathBuf]) -> WorkerResult<Vec<PathBuf>> {
    let mut inputs = Vec::new();

    for path in paths {
        if path.is_dir() {
            for entry in std::fs::read_dir(path)? {
                let candidate = entry?.path();
                if candidate.is_file() && has_image_extension(&candidate) {
                    inputs.push(candidate);
                }
            }
        } else if path.is_file() {
            inputs.push(path.clone());
        } else {
            return Err(WorkerError::unsupported(path, "no such file or directory"));
        }
    }

    inputs.sort();
    inputs.dedup();
    Ok(inputs)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
