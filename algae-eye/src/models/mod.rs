//! Detection model management and inference

pub mod manager;
pub mod postprocess;
#[cfg(feature = "onnx")]
pub mod yolo;

pub use manager::ModelManager;
pub use postprocess::{decode_predictions, non_max_suppression};
#[cfg(feature = "onnx")]
pub use yolo::YoloOnnxDetector;
