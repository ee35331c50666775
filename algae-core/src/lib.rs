//! algae-core: shared types for the algae cell counting service
//!
//! Holds the prediction and history records exchanged between the detector,
//! the result store and the HTTP layer, the density calculation, and the
//! service configuration.

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

pub use config::{AlgaeConfig, ConfigError};
pub use error::{Error, Result};
pub use metrics::density;
pub use types::{Detection, HistoryEntry, HistoryRecord, LatestSnapshot, PredictionResult};
