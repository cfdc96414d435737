use config::{Config, ConfigError, Environment, FileFormat, Map, Source, Value, ValueKind};
use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_INPUT_DATA: &str = "s3://udacity-dend/";
pub const DEFAULT_OUTPUT_DATA: &str = "s3://sparkify-output/tables/";

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub aws: AwsConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Credentials and connection details for S3-compatible roots.
///
/// Keys keep the names of the classic `dl.cfg` file (`AWS_ACCESS_KEY_ID`,
/// `AWS_SECRET_ACCESS_KEY`); [`IniFile`] lower-cases them on load.
#[derive(Debug, Deserialize, Clone)]
pub struct AwsConfig {
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_input_data")]
    pub input_data: String,
    #[serde(default = "default_output_data")]
    pub output_data: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input_data: default_input_data(),
            output_data: default_output_data(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PipelineConfig {
    #[serde(default)]
    pub validation_policy: ValidationPolicy,
    /// Absolute tolerance for the duration part of the song join. Zero means exact match.
    #[serde(default)]
    pub duration_tolerance: f64,
}

/// What to do with activity records that break the activity contract.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPolicy {
    #[default]
    RejectBatch,
    RejectRecord,
}

fn default_region() -> String {
    "us-west-2".to_string()
}

fn default_input_data() -> String {
    DEFAULT_INPUT_DATA.to_string()
}

fn default_output_data() -> String {
    DEFAULT_OUTPUT_DATA.to_string()
}

impl Settings {
    /// Loads an INI key/value file (e.g. `dl.cfg`), then applies `APP__SECTION__KEY`
    /// environment overrides. A missing file or missing credential keys is an error.
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        Self::load(
            path,
            Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__"),
        )
    }

    fn load(path: &str, environment: Environment) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(IniFile::new(path))
            .add_source(environment);

        let config = builder.build()?;

        let settings: Settings = config.try_deserialize()?;

        if settings.pipeline.duration_tolerance < 0.0 {
            return Err(ConfigError::Message(format!(
                "pipeline.duration_tolerance must not be negative, got {}",
                settings.pipeline.duration_tolerance
            )));
        }

        debug!(
            input = %settings.paths.input_data,
            output = %settings.paths.output_data,
            region = %settings.aws.region,
            policy = ?settings.pipeline.validation_policy,
            "Loaded pipeline settings"
        );

        Ok(settings)
    }
}

/// INI file source with lower-cased section and key names, so `[AWS]` /
/// `AWS_ACCESS_KEY_ID` land on the same keys as `APP__AWS__AWS_ACCESS_KEY_ID`.
#[derive(Debug, Clone)]
struct IniFile {
    path: String,
}

impl IniFile {
    fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
        }
    }
}

impl Source for IniFile {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new(self.clone())
    }

    fn collect(&self) -> Result<Map<String, Value>, ConfigError> {
        let raw = config::File::new(&self.path, FileFormat::Ini).collect()?;
        Ok(lowercase_keys(raw))
    }
}

fn lowercase_keys(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter()
        .map(|(key, mut value)| {
            value.kind = match std::mem::take(&mut value.kind) {
                ValueKind::Table(table) => ValueKind::Table(lowercase_keys(table)),
                other => other,
            };
            (key.to_lowercase(), value)
        })
        .collect()
}
