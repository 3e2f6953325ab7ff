//! Shroud worker: redacts image files with the privacy pipeline.
//!
//! Images are decoded, passed through [`shroud_media::PrivacyPipeline`] and
//! written only when the pipeline produced a transmittable result. An
//! optional JSON report describing the run is written next to each output.

pub mod config;
pub mod error;
pub mod runner;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use runner::{collect_inputs, FileOutcome, FileReport, ImageRunner, RunSummary};
