use algae_eye::VisionError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const MISSING_IMAGE_MESSAGE: &str = "Missing image_base64 in request body";

/// Ways a prediction request can end without a committed result
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Model not initialized on server.")]
    ModelUnavailable,

    #[error("Prediction failed: inference timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Prediction failed: {0}")]
    Prediction(String),
}

impl PipelineError {
    pub fn missing_image() -> Self {
        PipelineError::InvalidInput(MISSING_IMAGE_MESSAGE.to_string())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            PipelineError::ModelUnavailable | PipelineError::Timeout(_) | PipelineError::Prediction(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Payload problems become 400s, everything else a failed prediction
impl From<VisionError> for PipelineError {
    fn from(err: VisionError) -> Self {
        if err.is_client_error() {
            PipelineError::InvalidInput(err.to_string())
        } else {
            PipelineError::Prediction(err.to_string())
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse { error: self.to_string() });
        (self.status_code(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(PipelineError::missing_image().to_string(), MISSING_IMAGE_MESSAGE);
        assert_eq!(PipelineError::ModelUnavailable.to_string(), "Model not initialized on server.");
        assert_eq!(
            PipelineError::Timeout(Duration::from_secs(30)).to_string(),
            "Prediction failed: inference timed out after 30s"
        );
        assert_eq!(
            PipelineError::Prediction("boom".to_string()).to_string(),
            "Prediction failed: boom"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(PipelineError::missing_image().status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(PipelineError::ModelUnavailable.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            PipelineError::Timeout(Duration::from_secs(1)).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_vision_errors_map_by_cause() {
        let err = PipelineError::from(VisionError::Decode("invalid base64".to_string()));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Invalid image: invalid base64");

        let err = PipelineError::from(VisionError::Encode("PNG encoding failed".to_string()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Prediction failed: Encode error: PNG encoding failed");
    }
}
