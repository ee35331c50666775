//! HTTP routes

use crate::error::PipelineError;
use crate::pipeline::{PredictionPipeline, PredictionResponse};
use algae_core::config::ServerConfig;
use algae_core::HistoryRecord;
use axum::{
    extract::{DefaultBodyLimit, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<PredictionPipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<PredictionPipeline>) -> Self {
        Self { pipeline }
    }
}

/// Create HTTP router with all API routes
pub fn create_router(state: AppState, config: &ServerConfig) -> Router {
    let predict_routes = Router::new()
        .route("/predict", post(predict_handler).options(preflight_handler))
        .layer(cors_layer(&config.cors_origins));

    Router::new()
        .route("/", get(root_handler))
        .route("/data/algae_data.json", get(latest_handler))
        .route("/data/analysis_history.json", get(history_handler))
        .merge(predict_routes)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring invalid CORS origin {:?}", origin);
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({ "message": "API is running" }))
}

async fn latest_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.pipeline.store().read_latest_document() {
        Some(document) => Json(document).into_response(),
        None => Json(json!({})).into_response(),
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum HistoryOrder {
    #[default]
    Asc,
    Desc,
}

/// Query parameters for the history document
#[derive(Debug, Default, Deserialize)]
struct HistoryParams {
    #[serde(default)]
    order: HistoryOrder,
}

async fn history_handler(State(state): State<AppState>, Query(params): Query<HistoryParams>) -> Json<Vec<HistoryRecord>> {
    let store = state.pipeline.store();
    match params.order {
        HistoryOrder::Asc => Json(store.read_history()),
        HistoryOrder::Desc => Json(store.read_history_newest_first()),
    }
}

async fn preflight_handler() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn predict_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<PredictionResponse>, PipelineError> {
    match state.pipeline.predict(&body).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            if e.status_code().is_client_error() {
                warn!("Rejected prediction request: {}", e);
            } else {
                error!("Prediction request failed: {}", e);
            }
            Err(e)
        }
    }
}
