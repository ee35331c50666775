//! YOLO output decoding and non-maximum suppression
//!
//! Two output layouts are understood:
//! - YOLOv5: `[1, N, 5 + classes]`, rows of `cx, cy, w, h, objectness, class scores...`
//! - YOLOv8: `[1, 4 + classes, N]`, channels-first without objectness
//!
//! The layout is picked from the shape: more rows than columns means one row
//! per proposal.

use crate::detector::RawDetection;
use crate::error::VisionError;
use crate::imaging::Letterbox;

/// Upper bound on boxes kept after NMS
pub const MAX_DETECTIONS: usize = 1000;

/// Four box values plus at least one score
const MIN_CHANNELS: usize = 5;

/// Turn a raw output tensor into boxes in source image coordinates.
///
/// `source` is the `(width, height)` of the image before letterboxing.
pub fn decode_predictions(
    shape: &[usize],
    data: &[f32],
    letterbox: &Letterbox,
    source: (u32, u32),
    confidence_threshold: f32,
) -> Result<Vec<RawDetection>, VisionError> {
    let (rows, cols) = match shape {
        [1, rows, cols] | [rows, cols] => (*rows, *cols),
        _ => {
            return Err(VisionError::Processing(format!("Unexpected output shape {:?}", shape)));
        }
    };

    let expected = rows
        .checked_mul(cols)
        .ok_or_else(|| VisionError::Processing("Output shape would overflow".to_string()))?;
    if data.len() != expected {
        return Err(VisionError::Processing(format!(
            "Output has {} values, shape {:?} needs {}",
            data.len(),
            shape,
            expected
        )));
    }

    let anchors_first = rows > cols;
    let (proposals, channels) = if anchors_first { (rows, cols) } else { (cols, rows) };
    if channels < MIN_CHANNELS {
        return Err(VisionError::Processing(format!(
            "Output has {} channels, at least {} required",
            channels, MIN_CHANNELS
        )));
    }

    let value = |proposal: usize, channel: usize| -> f32 {
        if anchors_first {
            data[proposal * channels + channel]
        } else {
            data[channel * proposals + proposal]
        }
    };

    let (width, height) = (source.0 as f32, source.1 as f32);
    let mut detections = Vec::new();

    for i in 0..proposals {
        let confidence = if anchors_first {
            let objectness = value(i, 4);
            let best_class = (5..channels).map(|c| value(i, c)).fold(None, |best: Option<f32>, s| {
                Some(best.map_or(s, |b| b.max(s)))
            });
            objectness * best_class.unwrap_or(1.0)
        } else {
            (4..channels).map(|c| value(i, c)).fold(f32::MIN, f32::max)
        };

        if !confidence.is_finite() || confidence < confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (value(i, 0), value(i, 1), value(i, 2), value(i, 3));
        let (x1, y1) = letterbox.to_original(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.to_original(cx + w / 2.0, cy + h / 2.0);

        detections.push(RawDetection::new(
            x1.clamp(0.0, width),
            y1.clamp(0.0, height),
            x2.clamp(0.0, width),
            y2.clamp(0.0, height),
            confidence,
        ));
    }

    Ok(detections)
}

/// Greedy class-agnostic NMS. Output is sorted by descending confidence.
pub fn non_max_suppression(mut detections: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    detections.retain(|d| d.confidence.is_finite());
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<RawDetection> = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i]);
        if keep.len() == MAX_DETECTIONS {
            break;
        }

        for j in (i + 1)..detections.len() {
            if !suppressed[j] && detections[i].iou(&detections[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}
