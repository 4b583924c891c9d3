// Configuration loading - server settings and chart definitions
use crate::application::chart_configuration::{TimeResolutionSpec, DEFAULT_LIVE_TIMESTAMP_OFFSET};
use crate::application::chart_definition::ChartDefinition;
use crate::application::query_batcher::DEFAULT_ACCUMULATION_TIME;
use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,
    pub influx: InfluxSettings,
    #[serde(default)]
    pub batching: BatchingSettings,
    pub charts: ChartsSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct InfluxSettings {
    pub host: String,
    pub token: String,
    pub database: String,
    pub retention_policy: String,
    #[serde(default = "default_measurement")]
    pub measurement: String,
    /// Tag holding the collection id (e.g. the reporting host).
    #[serde(default = "default_collection_tag")]
    pub collection_tag: String,
    /// Tag holding the series id.
    #[serde(default = "default_series_tag")]
    pub series_tag: String,
    #[serde(default = "default_aggregator")]
    pub default_aggregator: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatchingSettings {
    #[serde(default = "default_accumulation_ms")]
    pub accumulation_ms: u64,
}

impl Default for BatchingSettings {
    fn default() -> Self {
        Self {
            accumulation_ms: default_accumulation_ms(),
        }
    }
}

impl BatchingSettings {
    pub fn accumulation_time(&self) -> Duration {
        Duration::from_millis(self.accumulation_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChartsSettings {
    pub definitions_path: String,
    #[serde(default)]
    pub static_series_path: Option<String>,
    #[serde(default = "default_live_timestamp_offset")]
    pub live_timestamp_offset: i64,
    #[serde(default = "default_resolutions")]
    pub resolutions: Vec<ResolutionSettings>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionSettings {
    pub time_resolution: i64,
    pub windows_count: usize,
    pub update_interval: u64,
}

impl From<ResolutionSettings> for TimeResolutionSpec {
    fn from(settings: ResolutionSettings) -> Self {
        TimeResolutionSpec {
            time_resolution: settings.time_resolution,
            windows_count: settings.windows_count,
            update_interval: settings.update_interval,
        }
    }
}

impl ChartsSettings {
    pub fn resolution_specs(&self) -> Vec<TimeResolutionSpec> {
        self.resolutions.iter().copied().map(TimeResolutionSpec::from).collect()
    }
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_measurement() -> String {
    "series".to_string()
}

fn default_collection_tag() -> String {
    "host".to_string()
}

fn default_series_tag() -> String {
    "name".to_string()
}

fn default_aggregator() -> String {
    "mean".to_string()
}

fn default_accumulation_ms() -> u64 {
    DEFAULT_ACCUMULATION_TIME.as_millis() as u64
}

fn default_live_timestamp_offset() -> i64 {
    DEFAULT_LIVE_TIMESTAMP_OFFSET
}

fn default_resolutions() -> Vec<ResolutionSettings> {
    vec![
        ResolutionSettings {
            time_resolution: 60,
            windows_count: 60,
            update_interval: 10,
        },
        ResolutionSettings {
            time_resolution: 3600,
            windows_count: 24,
            update_interval: 60,
        },
        ResolutionSettings {
            time_resolution: 86400,
            windows_count: 30,
            update_interval: 600,
        },
    ]
}

/// Reads `config/server.toml`, overridable through `SERIES_CHARTS__*`
/// environment variables (e.g. `SERIES_CHARTS__INFLUX__TOKEN`).
pub fn load_server_config() -> anyhow::Result<ServerConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/server"))
        .add_source(
            config::Environment::with_prefix("SERIES_CHARTS")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()
        .context("Failed to read server configuration")?;

    settings
        .try_deserialize()
        .context("Invalid server configuration")
}

/// Chart definitions are a JSON array of definitions.
pub fn load_chart_definitions(path: impl AsRef<Path>) -> anyhow::Result<Vec<ChartDefinition>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read chart definitions from {}", path.display()))?;
    parse_chart_definitions(&content)
        .with_context(|| format!("Invalid chart definitions in {}", path.display()))
}

fn parse_chart_definitions(content: &str) -> anyhow::Result<Vec<ChartDefinition>> {
    let definitions: Vec<ChartDefinition> = serde_json::from_str(content)?;
    let mut ids = std::collections::HashSet::new();
    for definition in &definitions {
        anyhow::ensure!(ids.insert(&definition.id), "duplicate chart id {}", definition.id);
    }
    Ok(definitions)
}
