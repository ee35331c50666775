//! Prediction and history records

use crate::metrics::density;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One cell found by the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// `[xmin, ymin, xmax, ymax]` in pixels of the submitted image
    #[serde(rename = "bbox")]
    pub bounding_box: [f64; 4],
    pub confidence: f64,
}

impl Detection {
    pub fn new(bounding_box: [f64; 4], confidence: f64) -> Self {
        Self { bounding_box, confidence }
    }
}

/// Result of analysing a single image. Never persisted as such.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    /// Annotated image as a `data:image/png;base64,...` URI
    pub annotated_image: String,
    pub detections: Vec<Detection>,
    pub total_cells: u64,
    pub density_cells_ml: u64,
    pub accuracy_model: String,
}

impl PredictionResult {
    /// Build a result, deriving the cell count and density from `detections`.
    pub fn new(
        annotated_image: String,
        detections: Vec<Detection>,
        chamber_volume_ml: f64,
        accuracy_model: impl Into<String>,
    ) -> Self {
        let total_cells = detections.len() as u64;
        Self {
            annotated_image,
            density_cells_ml: density(total_cells, chamber_volume_ml),
            total_cells,
            detections,
            accuracy_model: accuracy_model.into(),
        }
    }
}

/// Append-only record of a past analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistoryEntry {
    pub id: u64,
    #[serde(rename = "date")]
    pub timestamp: String,
    #[serde(rename = "file")]
    pub file_name: String,
    pub total_cells: u64,
    pub density_cells_ml: u64,
}

/// One element of the history document.
///
/// Entries written by this service parse as `Entry`. Anything else found in an
/// existing file (missing keys, extra keys, other JSON values) is kept as it
/// was read and written back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HistoryRecord {
    Entry(HistoryEntry),
    Other(Value),
}

impl HistoryRecord {
    /// The record's `id`, if it has a non-negative integer one
    pub fn id(&self) -> Option<u64> {
        match self {
            HistoryRecord::Entry(entry) => Some(entry.id),
            HistoryRecord::Other(value) => value.get("id").and_then(Value::as_u64),
        }
    }

    pub fn as_entry(&self) -> Option<&HistoryEntry> {
        match self {
            HistoryRecord::Entry(entry) => Some(entry),
            HistoryRecord::Other(_) => None,
        }
    }
}

impl From<HistoryEntry> for HistoryRecord {
    fn from(entry: HistoryEntry) -> Self {
        HistoryRecord::Entry(entry)
    }
}

/// Summary of the most recent analysis, replaced on every commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LatestSnapshot {
    pub total_cells: u64,
    pub density_cells_ml: u64,
    pub accuracy_model: String,
    pub last_updated: String,
    #[serde(rename = "last_image_base64")]
    pub last_image: String,
}

impl LatestSnapshot {
    pub fn from_result(result: &PredictionResult, last_updated: impl Into<String>) -> Self {
        Self {
            total_cells: result.total_cells,
            density_cells_ml: result.density_cells_ml,
            accuracy_model: result.accuracy_model.clone(),
            last_updated: last_updated.into(),
            last_image: result.annotated_image.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_detections(n: usize) -> Vec<Detection> {
        (0..n)
            .map(|i| Detection::new([i as f64, i as f64, i as f64 + 4.0, i as f64 + 3.5], 0.9))
            .collect()
    }

    #[test]
    fn test_prediction_result_counts_detections() {
        let result = PredictionResult::new("data:image/png;base64,".into(), sample_detections(7), 0.0001, "89.2");
        assert_eq!(result.total_cells, 7);
        assert_eq!(result.total_cells as usize, result.detections.len());
        assert_eq!(result.density_cells_ml, 70_000);
        assert_eq!(result.accuracy_model, "89.2");
    }

    #[test]
    fn test_prediction_result_zero_volume() {
        let result = PredictionResult::new(String::new(), sample_detections(3), 0.0, "89.2");
        assert_eq!(result.total_cells, 3);
        assert_eq!(result.density_cells_ml, 0);
    }

    #[test]
    fn test_detection_wire_format() {
        let detection = Detection::new([1.5, 2.25, 10.0, 12.75], 0.8123);
        let value = serde_json::to_value(&detection).unwrap();
        assert_eq!(value, json!({"bbox": [1.5, 2.25, 10.0, 12.75], "confidence": 0.8123}));
    }

    #[test]
    fn test_history_entry_uses_legacy_keys() {
        let entry = HistoryEntry {
            id: 3,
            timestamp: "2024/05/01 10:11:12".to_string(),
            file_name: "analysis_1714558272.png".to_string(),
            total_cells: 4,
            density_cells_ml: 40_000,
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["id"], 3);
        assert_eq!(value["date"], "2024/05/01 10:11:12");
        assert_eq!(value["file"], "analysis_1714558272.png");

        let parsed: HistoryEntry = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn test_history_records_keep_unknown_shapes() {
        let records: Vec<HistoryRecord> = serde_json::from_value(json!([
            {"id": 1, "date": "d", "file": "f", "total_cells": 2, "density_cells_ml": 20000},
            {"date": "d", "file": "f", "total_cells": 2, "density_cells_ml": 20000},
            {"id": 7, "date": "d", "file": "f", "total_cells": null, "density_cells_ml": null, "note": "manual"},
            "stray"
        ]))
        .unwrap();

        assert_eq!(records[0].id(), Some(1));
        assert!(records[0].as_entry().is_some());
        assert_eq!(records[1].id(), None);
        assert!(records[1].as_entry().is_none());
        assert_eq!(records[2].id(), Some(7));
        assert!(records[2].as_entry().is_none());
        assert_eq!(records[3].id(), None);

        let written = serde_json::to_value(&records).unwrap();
        assert_eq!(written[1], json!({"date": "d", "file": "f", "total_cells": 2, "density_cells_ml": 20000}));
        assert_eq!(written[2]["note"], "manual");
        assert_eq!(written[3], "stray");
    }

    #[test]
    fn test_latest_snapshot_from_result() {
        let result = PredictionResult::new("data:image/png;base64,AAAA".into(), sample_detections(2), 0.0001, "89.2");
        let snapshot = LatestSnapshot::from_result(&result, "2024/05/01 10:11:12");
        assert_eq!(snapshot.total_cells, 2);
        assert_eq!(snapshot.density_cells_ml, 20_000);
        assert_eq!(snapshot.last_image, "data:image/png;base64,AAAA");

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["last_image_base64"], "data:image/png;base64,AAAA");
        assert_eq!(value["last_updated"], "2024/05/01 10:11:12");
    }
}
