//! HTTP service for counting algae cells in microscope images

pub mod error;
pub mod http;
pub mod pipeline;

pub use error::PipelineError;
pub use http::{create_router, AppState};
pub use pipeline::{PredictionPipeline, PredictionResponse};
