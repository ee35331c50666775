//! Detector adapter: raw model output to normalized detections

use crate::error::VisionError;
use crate::imaging::draw_detections;
use algae_core::config::DetectorConfig;
use algae_core::metrics::round_to;
use algae_core::Detection;
use image::RgbImage;
use std::sync::Arc;
use tracing::{debug, warn};

/// Box as produced by a detection backend, before rounding and validation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
    pub confidence: f32,
}

impl RawDetection {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32, confidence: f32) -> Self {
        Self { xmin, ymin, xmax, ymax, confidence }
    }

    pub fn area(&self) -> f32 {
        (self.xmax - self.xmin).max(0.0) * (self.ymax - self.ymin).max(0.0)
    }

    /// Intersection over union with another box
    pub fn iou(&self, other: &RawDetection) -> f32 {
        let inter_w = (self.xmax.min(other.xmax) - self.xmin.max(other.xmin)).max(0.0);
        let inter_h = (self.ymax.min(other.ymax) - self.ymin.max(other.ymin)).max(0.0);
        let inter = inter_w * inter_h;
        if inter <= 0.0 {
            return 0.0;
        }

        let union = self.area() + other.area() - inter;
        if union <= 0.0 || !union.is_finite() {
            return 0.0;
        }
        inter / union
    }
}

/// The detection capability.
///
/// Implementations own whatever resizing the model needs and return boxes in
/// pixel coordinates of the image they were given, in model order.
pub trait CellDetector: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &str;

    fn detect(&self, image: &RgbImage) -> Result<Vec<RawDetection>, VisionError>;
}

/// How detections are drawn on the annotated image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxStyle {
    pub color: [u8; 3],
    pub thickness: u32,
}

impl Default for BoxStyle {
    fn default() -> Self {
        Self {
            color: [255, 56, 56],
            thickness: 2,
        }
    }
}

/// Output of one adapter run
#[derive(Debug, Clone)]
pub struct DetectionSet {
    pub detections: Vec<Detection>,
    pub annotated: RgbImage,
}

/// Wraps a [`CellDetector`] and normalizes what it returns
pub struct DetectorAdapter {
    detector: Arc<dyn CellDetector>,
    style: BoxStyle,
}

impl DetectorAdapter {
    pub fn new(detector: Arc<dyn CellDetector>, style: BoxStyle) -> Self {
        Self { detector, style }
    }

    pub fn from_config(detector: Arc<dyn CellDetector>, config: &DetectorConfig) -> Self {
        Self::new(
            detector,
            BoxStyle {
                color: config.box_color,
                thickness: config.box_thickness,
            },
        )
    }

    pub fn detector_name(&self) -> &str {
        self.detector.name()
    }

    /// Run detection and render the annotated image
    pub fn run(&self, image: &RgbImage) -> Result<DetectionSet, VisionError> {
        debug!("Running {} on {}x{} image", self.detector.name(), image.width(), image.height());

        let raw = self.detector.detect(image)?;
        let raw_count = raw.len();
        let detections: Vec<Detection> = raw.iter().filter_map(normalize_detection).collect();
        if detections.len() != raw_count {
            warn!(
                "Dropped {} detections with non-finite values from {}",
                raw_count - detections.len(),
                self.detector.name()
            );
        }

        let annotated = draw_detections(image, &detections, self.style.color, self.style.thickness);
        debug!("Detected {} cells", detections.len());

        Ok(DetectionSet { detections, annotated })
    }
}

/// Round coordinates to 2 decimals and confidence to 4.
///
/// Swapped corners are reordered and confidence is clamped to [0, 1].
/// Returns `None` when any value is NaN or infinite.
pub fn normalize_detection(raw: &RawDetection) -> Option<Detection> {
    let values = [raw.xmin, raw.ymin, raw.xmax, raw.ymax, raw.confidence];
    if values.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let (xmin, xmax) = order(raw.xmin as f64, raw.xmax as f64);
    let (ymin, ymax) = order(raw.ymin as f64, raw.ymax as f64);
    let confidence = (raw.confidence as f64).clamp(0.0, 1.0);

    Some(Detection::new(
        [round_to(xmin, 2), round_to(ymin, 2), round_to(xmax, 2), round_to(ymax, 2)],
        round_to(confidence, 4),
    ))
}

fn order(a: f64, b: f64) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    struct FixedDetector(Vec<RawDetection>);

    impl CellDetector for FixedDetector {
        fn name(&self) -> &str {
            "fixed"
        }

        fn detect(&self, _image: &RgbImage) -> Result<Vec<RawDetection>, VisionError> {
            Ok(self.0.clone())
        }
    }

    struct FailingDetector;

    impl CellDetector for FailingDetector {
        fn name(&self) -> &str {
            "failing"
        }

        fn detect(&self, _image: &RgbImage) -> Result<Vec<RawDetection>, VisionError> {
            Err(VisionError::Ort("session crashed".to_string()))
        }
    }

    #[test]
    fn test_normalize_rounds_values() {
        let raw = RawDetection::new(10.126, 20.004, 30.555, 40.0, 0.876_543);
        let detection = normalize_detection(&raw).unwrap();
        assert_eq!(detection.bounding_box, [10.13, 20.0, 30.56, 40.0]);
        assert_eq!(detection.confidence, 0.8765);
    }

    #[test]
    fn test_normalize_reorders_swapped_corners() {
        let raw = RawDetection::new(30.0, 40.0, 10.0, 20.0, 0.5);
        let detection = normalize_detection(&raw).unwrap();
        assert_eq!(detection.bounding_box, [10.0, 20.0, 30.0, 40.0]);
    }

    #[test]
    fn test_normalize_clamps_confidence() {
        let high = normalize_detection(&RawDetection::new(0.0, 0.0, 1.0, 1.0, 1.7)).unwrap();
        assert_eq!(high.confidence, 1.0);
        let low = normalize_detection(&RawDetection::new(0.0, 0.0, 1.0, 1.0, -0.2)).unwrap();
        assert_eq!(low.confidence, 0.0);
    }

    #[test]
    fn test_normalize_drops_non_finite() {
        assert!(normalize_detection(&RawDetection::new(f32::NAN, 0.0, 1.0, 1.0, 0.5)).is_none());
        assert!(normalize_detection(&RawDetection::new(0.0, 0.0, f32::INFINITY, 1.0, 0.5)).is_none());
        assert!(normalize_detection(&RawDetection::new(0.0, 0.0, 1.0, 1.0, f32::NAN)).is_none());
    }

    #[test]
    fn test_iou() {
        let a = RawDetection::new(0.0, 0.0, 10.0, 10.0, 0.9);
        let b = RawDetection::new(5.0, 0.0, 15.0, 10.0, 0.8);
        let c = RawDetection::new(20.0, 20.0, 30.0, 30.0, 0.8);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.iou(&c), 0.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_adapter_run_preserves_model_order() {
        let detector = FixedDetector(vec![
            RawDetection::new(5.0, 5.0, 9.0, 9.0, 0.6),
            RawDetection::new(1.0, 1.0, 4.0, 4.0, 0.9),
            RawDetection::new(f32::NAN, 1.0, 4.0, 4.0, 0.9),
        ]);
        let adapter = DetectorAdapter::new(Arc::new(detector), BoxStyle::default());
        let image = RgbImage::from_pixel(16, 16, Rgb([0, 0, 0]));

        let set = adapter.run(&image).unwrap();
        assert_eq!(set.detections.len(), 2);
        assert_eq!(set.detections[0].confidence, 0.6);
        assert_eq!(set.detections[1].confidence, 0.9);
        assert_eq!(set.annotated.dimensions(), (16, 16));
        assert_eq!(set.annotated.get_pixel(5, 5), &Rgb([255, 56, 56]));
    }

    #[test]
    fn test_adapter_propagates_backend_failure() {
        let adapter = DetectorAdapter::new(Arc::new(FailingDetector), BoxStyle::default());
        let image = RgbImage::new(4, 4);
        assert!(matches!(adapter.run(&image), Err(VisionError::Ort(_))));
    }

    #[test]
    fn test_adapter_from_config_style() {
        let mut config = DetectorConfig::default();
        config.box_color = [0, 255, 0];
        config.box_thickness = 1;
        let adapter = DetectorAdapter::from_config(Arc::new(FixedDetector(vec![])), &config);
        assert_eq!(adapter.detector_name(), "fixed");
        assert_eq!(adapter.style, BoxStyle { color: [0, 255, 0], thickness: 1 });
    }
}
