use std::path::Path;

use shroud_media::{PrivacyConfig, PrivacyLevel, PrivacyPipeline};
use shroud_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "shroud-selfcheck: starting with output_dir={}",
        config.output_dir.display()
    );
    ensure_output_dir(&config.output_dir).await?;

    let privacy = PrivacyConfig::load(config.config_path.as_deref())
        .map_err(|e| anyhow::anyhow!("invalid privacy configuration: {}", e))?;
    let level = config.level.unwrap_or(privacy.level);
    let detectors = privacy.scheduled_detectors();
    println!(
        "shroud-selfcheck: level={} detectors={:?} models={}",
        level,
        detectors,
        privacy.model_base_path.display()
    );

    let pipeline = PrivacyPipeline::new(privacy)?;
    println!(
        "shroud-selfcheck: backends={:?}",
        pipeline.registry().backends()
    );

    ensure_models(&pipeline, level, &detectors)?;
    pipeline.shutdown();

    println!("shroud-selfcheck: ok");
    Ok(())
}

async fn ensure_output_dir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}

fn ensure_models(
    pipeline: &PrivacyPipeline,
    level: PrivacyLevel,
    detectors: &[shroud_media::DetectorType],
) -> anyhow::Result<()> {
    let validation = pipeline.registry().validate_level(level, detectors);
    for (key, path) in &validation.missing {
        println!("shroud-selfcheck: missing {} at {}", key, path.display());
    }

    if !validation.is_complete() {
        return Err(anyhow::anyhow!(
            "{} of {} models missing for level {}",
            validation.missing.len(),
            detectors.len(),
            level
        ));
    }
    Ok(())
}
