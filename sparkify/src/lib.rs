pub mod processor;
pub mod schema;
pub mod storage;
pub mod utils;

use common::Result;
use common::config::Settings;
use processor::{RunManifest, SparkifyProcessor};
use tracing::info;

/// Runs the complete star-schema pipeline with settings loaded from `config_path`.
pub async fn run_pipeline(config_path: &str) -> Result<RunManifest> {
    let settings = Settings::new(config_path)?;
    info!(config = config_path, "Configuration loaded");
    run_with_settings(&settings).await
}

pub async fn run_with_settings(settings: &Settings) -> Result<RunManifest> {
    let processor = SparkifyProcessor::new(settings)?;
    processor.run().await
}
