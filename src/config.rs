use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::acquisition::SubbandRange;
use crate::observation::ObservationParams;
use crate::station::Station;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub station: StationConfig,
    pub input: InputConfig,
    #[serde(default)]
    pub subbands: SubbandConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub renderer: Option<RendererConfig>,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub api_keys: Vec<ApiKey>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StationConfig {
    pub name: String,
    #[serde(default = "default_rcu_mode")]
    pub rcu_mode: u8,
    #[serde(default = "default_height")]
    pub height_m: f64,
    #[serde(default = "default_extent")]
    pub extent_m: f64,
}

fn default_rcu_mode() -> u8 {
    3
}

fn default_height() -> f64 {
    1.5
}

fn default_extent() -> f64 {
    50.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    pub folder: PathBuf,
    #[serde(default = "default_suffix")]
    pub suffix: String,
    #[serde(
        default = "default_poll_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub poll_interval: Duration,
    /// How long to wait for the observation descriptor once the stream
    /// file has appeared.
    #[serde(
        default = "default_descriptor_wait",
        deserialize_with = "deserialize_duration"
    )]
    pub descriptor_wait: Duration,
}

fn default_suffix() -> String {
    "_xst.dat".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(200)
}

fn default_descriptor_wait() -> Duration {
    Duration::from_millis(500)
}

/// Where the subband range comes from when an observation starts.
///
/// With `manual: true` the configured range is used unconditionally. Otherwise
/// the observation descriptor in the input folder wins and `range` is only the
/// fallback when the descriptor carries no `subbands=` line.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubbandConfig {
    #[serde(default)]
    pub manual: bool,
    #[serde(default)]
    pub range: Option<SubbandRange>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default = "default_step")]
    pub step: u64,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default)]
    pub queue_capacity: Option<usize>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            step: default_step(),
            threads: default_threads(),
            queue_capacity: None,
        }
    }
}

fn default_step() -> u64 {
    1
}

fn default_threads() -> usize {
    4
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    pub base_folder: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RendererConfig {
    pub command: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiKey {
    pub key: String,
    pub name: String,
    pub permissions: HashSet<Permission>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ControlObservation,
    ViewStatus,
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    pub fn from_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processing.step == 0 {
            return Err(ConfigError::Invalid("processing.step must be at least 1".into()));
        }
        if self.processing.threads == 0 {
            return Err(ConfigError::Invalid(
                "processing.threads must be at least 1".into(),
            ));
        }
        if self.processing.queue_capacity == Some(0) {
            return Err(ConfigError::Invalid(
                "processing.queue_capacity must be at least 1".into(),
            ));
        }
        if self.subbands.manual && self.subbands.range.is_none() {
            return Err(ConfigError::Invalid(
                "subbands.manual requires subbands.range".into(),
            ));
        }
        if let Some(range) = self.subbands.range {
            SubbandRange::new(range.min, range.max)
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        if self.station.extent_m <= 0.0 {
            return Err(ConfigError::Invalid("station.extent_m must be positive".into()));
        }
        Ok(())
    }

    pub fn find_api_key(&self, key: &str) -> Option<&ApiKey> {
        self.api_keys.iter().find(|k| k.key == key)
    }

    /// Observation parameters used when a start request does not override them.
    pub fn default_params(&self) -> ObservationParams {
        ObservationParams {
            folder: self.input.folder.clone(),
            threads: self.processing.threads,
            step: self.processing.step,
            height_m: self.station.height_m,
            extent_m: self.station.extent_m,
        }
    }

    pub fn station(&self, params: &ObservationParams) -> Station {
        Station::new(
            &self.station.name,
            self.station.rcu_mode,
            params.height_m,
            params.extent_m,
        )
    }

    /// Bound of the render queue; defaults to two pending jobs per worker.
    pub fn queue_capacity(&self, threads: usize) -> usize {
        self.processing
            .queue_capacity
            .unwrap_or_else(|| threads.saturating_mul(2))
            .max(1)
    }
}
