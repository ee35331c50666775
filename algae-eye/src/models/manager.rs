//! Model file resolution, verification and backend loading

use crate::detector::CellDetector;
use crate::error::VisionError;
use algae_core::config::DetectorConfig;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Smaller files are truncated downloads, not models
const MIN_MODEL_BYTES: u64 = 1024;

/// Locates the configured model file and builds the detection backend
pub struct ModelManager {
    config: Arc<DetectorConfig>,
}

impl ModelManager {
    pub fn new(config: Arc<DetectorConfig>) -> Self {
        Self { config }
    }

    /// Check the model file exists, is plausibly sized and matches the
    /// configured checksum.
    pub fn resolve_model(&self) -> Result<PathBuf, VisionError> {
        let model_path = &self.config.model_path;

        let metadata = fs::metadata(model_path)
            .map_err(|e| VisionError::Model(format!("Model file {:?} is not readable: {}", model_path, e)))?;
        if !metadata.is_file() {
            return Err(VisionError::Model(format!("Model path {:?} is not a file", model_path)));
        }
        if metadata.len() < MIN_MODEL_BYTES {
            return Err(VisionError::Model(format!(
                "Model file {:?} is only {} bytes, likely corrupted",
                model_path,
                metadata.len()
            )));
        }

        match &self.config.model_sha256 {
            Some(expected) => {
                let computed = file_sha256(model_path)?;
                if !computed.eq_ignore_ascii_case(expected) {
                    return Err(VisionError::Model(format!(
                        "Checksum mismatch for {:?}: expected {}, got {}",
                        model_path, expected, computed
                    )));
                }
                info!("Verified checksum for model {:?}", model_path);
            }
            None => {
                info!("Using model {:?} ({} bytes, checksum verification skipped)", model_path, metadata.len());
            }
        }

        Ok(model_path.clone())
    }

    /// Resolve the model and load the detection backend
    pub fn load_detector(&self) -> Result<Arc<dyn CellDetector>, VisionError> {
        let model_path = self.resolve_model()?;
        self.load_backend(&model_path)
    }

    #[cfg(feature = "onnx")]
    fn load_backend(&self, model_path: &Path) -> Result<Arc<dyn CellDetector>, VisionError> {
        let detector = crate::models::YoloOnnxDetector::load(model_path, &self.config)?;
        Ok(Arc::new(detector))
    }

    #[cfg(not(feature = "onnx"))]
    fn load_backend(&self, model_path: &Path) -> Result<Arc<dyn CellDetector>, VisionError> {
        Err(VisionError::Model(format!(
            "Cannot load {:?}: built without the `onnx` feature",
            model_path
        )))
    }
}

/// Hex encoded SHA-256 of a file
pub fn file_sha256(path: &Path) -> Result<String, VisionError> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
