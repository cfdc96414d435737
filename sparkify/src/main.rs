use anyhow::Context;
use clap::{Arg, Command};
use sparkify::processor::RunManifest;
use std::process;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "dl.cfg";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("SPARKIFY_LOG_JSON").is_ok_and(|v| v == "1");

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run(config_path: &str) -> anyhow::Result<RunManifest> {
    sparkify::run_pipeline(config_path)
        .await
        .with_context(|| format!("Sparkify pipeline failed (config: {})", config_path))
}

#[tokio::main]
async fn main() {
    init_tracing();

    let matches = Command::new("sparkify-etl")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Builds the Sparkify star schema from song and activity JSON")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Sets a custom config file")
                .default_value(DEFAULT_CONFIG),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(|s| s.as_str())
        .unwrap_or(DEFAULT_CONFIG);
    info!(config = config_path, "Starting Sparkify pipeline");

    match run(config_path).await {
        Ok(manifest) => {
            for table in &manifest.tables {
                info!(
                    table = %table.table_name,
                    rows = table.row_count,
                    files = table.file_count,
                    "Table summary"
                );
            }
        }
        Err(e) => {
            error!("{:#}", e);
            process::exit(1);
        }
    }
}
