//! algae-eye: cell detection for microscope images
//!
//! Wraps an opaque detection capability behind the [`CellDetector`] trait and
//! turns its raw output into rounded, validated [`algae_core::Detection`]s plus
//! an annotated copy of the image. The ONNX Runtime YOLOv5 backend is only
//! compiled with the `onnx` feature.

pub mod detector;
pub mod error;
pub mod imaging;
pub mod models;

pub use detector::{BoxStyle, CellDetector, DetectionSet, DetectorAdapter, RawDetection};
pub use error::VisionError;
pub use models::ModelManager;
