//! YOLO detector backed by ONNX Runtime

use crate::detector::{CellDetector, RawDetection};
use crate::error::VisionError;
use crate::imaging::{letterbox, to_chw_tensor};
use crate::models::postprocess::{decode_predictions, non_max_suppression};
use algae_core::config::DetectorConfig;
use image::RgbImage;
use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, info};

pub struct YoloOnnxDetector {
    // Session::run needs exclusive access
    session: Mutex<Session>,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl YoloOnnxDetector {
    pub fn load(model_path: &Path, config: &DetectorConfig) -> Result<Self, VisionError> {
        let session = Session::builder()
            .map_err(|e| VisionError::Ort(format!("failed to create session builder: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| VisionError::Ort(format!("failed to load {:?}: {}", model_path, e)))?;

        info!(
            "Loaded ONNX model {:?} (input {}x{}, conf {}, iou {})",
            model_path, config.input_size, config.input_size, config.confidence_threshold, config.iou_threshold
        );

        Ok(Self {
            session: Mutex::new(session),
            input_size: config.input_size,
            confidence_threshold: config.confidence_threshold,
            iou_threshold: config.iou_threshold,
        })
    }
}

impl CellDetector for YoloOnnxDetector {
    fn name(&self) -> &str {
        "yolo-onnx"
    }

    fn detect(&self, image: &RgbImage) -> Result<Vec<RawDetection>, VisionError> {
        let boxed = letterbox(image, self.input_size)?;
        let size = self.input_size as usize;
        let input = Tensor::from_array(([1usize, 3, size, size], to_chw_tensor(&boxed.image).into_boxed_slice()))
            .map_err(|e| VisionError::Ort(format!("failed to create input tensor: {}", e)))?;

        let (shape, data) = {
            let mut session = self.session.lock();
            let outputs = session
                .run(ort::inputs![input])
                .map_err(|e| VisionError::Ort(format!("inference failed: {}", e)))?;
            let (_, output) = outputs
                .iter()
                .next()
                .ok_or_else(|| VisionError::Ort("model produced no outputs".to_string()))?;
            let (shape, data) = output
                .try_extract_tensor::<f32>()
                .map_err(|e| VisionError::Ort(format!("failed to extract output tensor: {}", e)))?;
            let shape: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
            (shape, data.to_vec())
        };

        let candidates = decode_predictions(&shape, &data, &boxed, image.dimensions(), self.confidence_threshold)?;
        let candidate_count = candidates.len();
        let kept = non_max_suppression(candidates, self.iou_threshold);
        debug!("NMS kept {} of {} candidates", kept.len(), candidate_count);

        Ok(kept)
    }
}
