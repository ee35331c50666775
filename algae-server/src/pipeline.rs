//! Request to response flow for one image

use crate::error::PipelineError;
use algae_core::config::AlgaeConfig;
use algae_core::{Detection, PredictionResult};
use algae_eye::imaging::{decode_image_payload, encode_png_data_uri};
use algae_eye::DetectorAdapter;
use algae_storage::ResultStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Successful `/predict` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub image_base64: String,
    pub detected: Vec<Detection>,
    pub total_cells: u64,
    pub density_cells_ml: u64,
    pub accuracy_model: String,
    /// History id assigned to this analysis
    pub analysis_id: u64,
}

pub struct PredictionPipeline {
    adapter: Option<Arc<DetectorAdapter>>,
    store: Arc<ResultStore>,
    chamber_volume_ml: f64,
    accuracy_model: String,
    inference_timeout: Duration,
}

impl PredictionPipeline {
    pub fn new(
        adapter: Option<Arc<DetectorAdapter>>,
        store: Arc<ResultStore>,
        chamber_volume_ml: f64,
        accuracy_model: impl Into<String>,
        inference_timeout: Duration,
    ) -> Self {
        Self {
            adapter,
            store,
            chamber_volume_ml,
            accuracy_model: accuracy_model.into(),
            inference_timeout,
        }
    }

    pub fn from_config(adapter: Option<Arc<DetectorAdapter>>, store: Arc<ResultStore>, config: &AlgaeConfig) -> Self {
        Self::new(
            adapter,
            store,
            config.analysis.chamber_volume_ml,
            config.analysis.accuracy_model.clone(),
            Duration::from_secs(config.detector.inference_timeout_secs),
        )
    }

    pub fn store(&self) -> &Arc<ResultStore> {
        &self.store
    }

    /// Analyse the image in a JSON request body and commit the result.
    ///
    /// Nothing is written to the store unless every step succeeds.
    pub async fn predict(&self, body: &[u8]) -> Result<PredictionResponse, PipelineError> {
        let payload = extract_image_payload(body)?;
        let adapter = self.adapter.clone().ok_or(PipelineError::ModelUnavailable)?;

        let started = Instant::now();
        let job = tokio::task::spawn_blocking(move || -> Result<(Vec<Detection>, String), PipelineError> {
            let image = decode_image_payload(&payload)?;
            let set = adapter.run(&image)?;
            let annotated = encode_png_data_uri(&set.annotated)?;
            Ok((set.detections, annotated))
        });

        let (detections, annotated_image) = match tokio::time::timeout(self.inference_timeout, job).await {
            Ok(Ok(outcome)) => outcome?,
            Ok(Err(join_error)) => {
                return Err(PipelineError::Prediction(format!("inference task failed: {}", join_error)));
            }
            Err(_) => return Err(PipelineError::Timeout(self.inference_timeout)),
        };
        debug!("Inference finished in {:?}", started.elapsed());

        let result = PredictionResult::new(
            annotated_image,
            detections,
            self.chamber_volume_ml,
            self.accuracy_model.clone(),
        );
        let entry = self.store.commit(&result);
        info!(
            "Analysis {} complete: {} cells, {} cells/ml",
            entry.id, result.total_cells, result.density_cells_ml
        );

        Ok(PredictionResponse {
            image_base64: result.annotated_image,
            detected: result.detections,
            total_cells: result.total_cells,
            density_cells_ml: result.density_cells_ml,
            accuracy_model: result.accuracy_model,
            analysis_id: entry.id,
        })
    }
}

/// Pull `image_base64` out of a JSON object body
fn extract_image_payload(body: &[u8]) -> Result<String, PipelineError> {
    let value: Value = serde_json::from_slice(body).map_err(|_| PipelineError::missing_image())?;
    match value.get("image_base64") {
        Some(Value::String(payload)) => Ok(payload.clone()),
        _ => Err(PipelineError::missing_image()),
    }
}
