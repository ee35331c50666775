//! Service configuration
//!
//! Every section falls back to its defaults, so a config file only needs the
//! keys it changes. Files may be JSON, TOML or YAML.

use crate::metrics::DEFAULT_CHAMBER_VOLUME_ML;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origins allowed to call `/predict` from a browser. Empty allows any.
    pub cors_origins: Vec<String>,
    /// Largest accepted request body; base64 images are big
    pub max_body_bytes: usize,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4500,
            cors_origins: Vec::new(),
            max_body_bytes: 32 * 1024 * 1024,
            log_level: "info".to_string(),
        }
    }
}

/// Where the latest snapshot and the history log live on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub latest_file: String,
    pub history_file: String,
    /// Seconds between background flushes; 0 flushes only at shutdown
    pub flush_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            latest_file: "algae_data.json".to_string(),
            history_file: "analysis_history.json".to_string(),
            flush_interval_secs: 60,
        }
    }
}

impl StorageConfig {
    pub fn latest_path(&self) -> PathBuf {
        self.data_dir.join(&self.latest_file)
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join(&self.history_file)
    }
}

/// Detection model settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub model_path: PathBuf,
    /// Expected SHA-256 of the model file, hex encoded
    pub model_sha256: Option<String>,
    /// Long edge the image is letterboxed to before inference
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub inference_timeout_secs: u64,
    pub box_color: [u8; 3],
    pub box_thickness: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("./model/best.onnx"),
            model_sha256: None,
            input_size: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            inference_timeout_secs: 30,
            box_color: [255, 56, 56],
            box_thickness: 2,
        }
    }
}

/// Parameters of the density calculation and the reported model accuracy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub chamber_volume_ml: f64,
    pub accuracy_model: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            chamber_volume_ml: DEFAULT_CHAMBER_VOLUME_ML,
            accuracy_model: "89.2".to_string(),
        }
    }
}

/// Complete service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlgaeConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub detector: DetectorConfig,
    pub analysis: AnalysisConfig,
}

impl AlgaeConfig {
    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
        Self::from_str(&content)
    }

    /// Load configuration from string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        if let Ok(config) = serde_json::from_str::<AlgaeConfig>(content) {
            return Ok(config);
        }

        if let Ok(config) = toml::from_str::<AlgaeConfig>(content) {
            return Ok(config);
        }

        serde_yaml::from_str::<AlgaeConfig>(content)
            .map_err(|_| ConfigError::ParseError("Unknown format (expected JSON, TOML or YAML)".to_string()))
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> crate::Result<String> {
        toml::to_string_pretty(self).map_err(|e| crate::Error::Serialization(e.to_string()))
    }

    /// Apply `ALGAE_*` environment variables on top of the current values
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup. Unparsable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("ALGAE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("ALGAE_PORT").and_then(|p| p.parse::<u16>().ok()) {
            self.server.port = port;
        }
        if let Some(level) = lookup("ALGAE_LOG_LEVEL") {
            self.server.log_level = level;
        }
        if let Some(data_dir) = lookup("ALGAE_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(data_dir);
        }
        if let Some(model) = lookup("ALGAE_MODEL_PATH") {
            self.detector.model_path = PathBuf::from(model);
        }
        if let Some(volume) = lookup("ALGAE_CHAMBER_VOLUME_ML").and_then(|v| v.parse::<f64>().ok()) {
            self.analysis.chamber_volume_ml = volume;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_body_bytes == 0 {
            return Err(ConfigError::ValidationError("max_body_bytes must be > 0".to_string()));
        }

        for name in [&self.storage.latest_file, &self.storage.history_file] {
            if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
                return Err(ConfigError::ValidationError(format!(
                    "Storage file name '{}' must be a plain file name",
                    name
                )));
            }
        }
        if self.storage.latest_file == self.storage.history_file {
            return Err(ConfigError::ValidationError(
                "latest_file and history_file must differ".to_string(),
            ));
        }

        let detector = &self.detector;
        if detector.input_size < 32 || detector.input_size > 4096 || detector.input_size % 32 != 0 {
            return Err(ConfigError::ValidationError(
                "input_size must be a multiple of 32 between 32 and 4096".to_string(),
            ));
        }
        if !(detector.confidence_threshold > 0.0 && detector.confidence_threshold <= 1.0) {
            return Err(ConfigError::ValidationError(
                "confidence_threshold must be in (0, 1]".to_string(),
            ));
        }
        if !(detector.iou_threshold > 0.0 && detector.iou_threshold <= 1.0) {
            return Err(ConfigError::ValidationError("iou_threshold must be in (0, 1]".to_string()));
        }
        if detector.inference_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "inference_timeout_secs must be > 0".to_string(),
            ));
        }
        if let Some(checksum) = &detector.model_sha256 {
            if checksum.len() != 64 || !checksum.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(ConfigError::ValidationError(
                    "model_sha256 must be 64 hex characters".to_string(),
                ));
            }
        }

        if self.analysis.chamber_volume_ml.is_nan() {
            return Err(ConfigError::ValidationError("chamber_volume_ml must be a number".to_string()));
        }

        Ok(())
    }
}
