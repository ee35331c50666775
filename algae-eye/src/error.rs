//! Error types for algae-eye

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Model error: {0}")]
    Model(String),

    #[error("Invalid image: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ONNX Runtime error: {0}")]
    Ort(String),
}

impl VisionError {
    /// True when the failure is caused by the submitted payload, not the server
    pub fn is_client_error(&self) -> bool {
        matches!(self, VisionError::Decode(_))
    }
}
