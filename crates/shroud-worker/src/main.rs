//! Image redaction worker binary.
//!
//! Usage: `shroud-worker <file-or-dir>...`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shroud_media::{PrivacyConfig, PrivacyPipeline};
use shroud_worker::{collect_inputs, ImageRunner, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("shroud=info".parse()?)
        .add_directive("ort=warn".parse()?)
        .add_directive("onnxruntime=warn".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting shroud-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let metrics = if config.metrics {
        Some(
            PrometheusBuilder::new()
                .install_recorder()
                .context("failed to install Prometheus recorder")?,
        )
    } else {
        None
    };

    let args: Vec<PathBuf> = std::env::args().skip(1).map(PathBuf::from).collect();
    if args.is_empty() {
        anyhow::bail!("usage: shroud-worker <file-or-dir>...");
    }
    let inputs = collect_inputs(&args)?;
    if inputs.is_empty() {
        anyhow::bail!("no images found in {:?}", args);
    }

    let privacy = PrivacyConfig::load(config.config_path.as_deref())
        .context("failed to load privacy configuration")?;
    let pipeline = Arc::new(PrivacyPipeline::new(privacy)?);
    pipeline.initialize().await?;

    let runner = ImageRunner::new(pipeline.clone(), config);
    let summary = tokio::select! {
        summary = runner.run(inputs) => summary?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            pipeline.shutdown();
            anyhow::bail!("interrupted");
        }
    };

    pipeline.shutdown();
    let stats = pipeline.registry_stats();
    info!(
        resident = stats.resident,
        loads = stats.loads,
        cache_hits = stats.cache_hits,
        evictions = stats.evictions,
        "Model registry totals"
    );

    if let Some(handle) = metrics {
        info!("Metrics snapshot:\n{}", handle.render());
    }

    if !summary.is_clean() {
        error!(
            refused = summary.refused,
            failed = summary.failed,
            "Some images were not written"
        );
        anyhow::bail!(
            "{} of {} images were not written",
            summary.refused + summary.failed,
            summary.total()
        );
    }

    info!(
        redacted = summary.redacted,
        unchanged = summary.unchanged,
        "shroud-worker finished"
    );
    Ok(())
}
