//! Image codec and drawing helpers

use crate::error::VisionError;
use algae_core::Detection;
use base64::{engine::general_purpose, Engine as _};
use image::{imageops::FilterType, ImageOutputFormat, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::io::Cursor;

pub const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// Padding color YOLOv5 uses when letterboxing
const LETTERBOX_FILL: Rgb<u8> = Rgb([114, 114, 114]);

/// Decode a base64 image, with or without a `data:` URI prefix, into RGB pixels.
///
/// Everything after the last comma is treated as the base64 body.
pub fn decode_image_payload(payload: &str) -> Result<RgbImage, VisionError> {
    let body = payload.rsplit(',').next().unwrap_or(payload);
    let body: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if body.is_empty() {
        return Err(VisionError::Decode("empty image payload".to_string()));
    }

    let bytes = general_purpose::STANDARD
        .decode(body.as_bytes())
        .map_err(|e| VisionError::Decode(format!("invalid base64: {}", e)))?;

    let image = image::load_from_memory(&bytes)
        .map_err(|e| VisionError::Decode(format!("unsupported image data: {}", e)))?;

    Ok(image.to_rgb8())
}

/// Encode pixels as a PNG `data:` URI
pub fn encode_png_data_uri(image: &RgbImage) -> Result<String, VisionError> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageOutputFormat::Png)
        .map_err(|e| VisionError::Encode(format!("PNG encoding failed: {}", e)))?;

    let encoded = general_purpose::STANDARD.encode(buffer.into_inner());
    Ok(format!("{}{}", PNG_DATA_URI_PREFIX, encoded))
}

/// Return a copy of `image` with a hollow rectangle around every detection.
///
/// Thicker borders grow inwards so boxes stay inside their coordinates.
/// Coordinates are clipped to one pixel past the image edges first.
pub fn draw_detections(image: &RgbImage, detections: &[Detection], color: [u8; 3], thickness: u32) -> RgbImage {
    let mut annotated = image.clone();
    let color = Rgb(color);
    let max_x = annotated.width() as f64 + 1.0;
    let max_y = annotated.height() as f64 + 1.0;

    for detection in detections {
        let [x1, y1, x2, y2] = detection.bounding_box;
        let (x1, y1) = (x1.clamp(-1.0, max_x).floor() as i64, y1.clamp(-1.0, max_y).floor() as i64);
        let (x2, y2) = (x2.clamp(-1.0, max_x).ceil() as i64, y2.clamp(-1.0, max_y).ceil() as i64);

        for t in 0..thickness.max(1) as i64 {
            let width = x2 - x1 - 2 * t;
            let height = y2 - y1 - 2 * t;
            if width < 1 || height < 1 {
                break;
            }
            let rect = Rect::at((x1 + t) as i32, (y1 + t) as i32).of_size(width as u32, height as u32);
            draw_hollow_rect_mut(&mut annotated, rect, color);
        }
    }

    annotated
}

/// Image resized to a square model input with the aspect ratio preserved
#[derive(Debug, Clone)]
pub struct Letterbox {
    pub image: RgbImage,
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    /// Map a point in letterboxed space back onto the source image
    pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Resize so the long edge equals `size` and pad the rest with gray.
pub fn letterbox(image: &RgbImage, size: u32) -> Result<Letterbox, VisionError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || size == 0 {
        return Err(VisionError::Processing("Cannot letterbox an empty image".to_string()));
    }

    let scale = size as f32 / width.max(height) as f32;
    let new_width = ((width as f32 * scale).round() as u32).clamp(1, size);
    let new_height = ((height as f32 * scale).round() as u32).clamp(1, size);
    let pad_x = (size - new_width) / 2;
    let pad_y = (size - new_height) / 2;

    let resized = image::imageops::resize(image, new_width, new_height, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(size, size, LETTERBOX_FILL);
    image::imageops::overlay(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    Ok(Letterbox {
        image: canvas,
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
    })
}

/// Planar `[3, H, W]` float tensor data normalized to [0, 1]
pub fn to_chw_tensor(image: &RgbImage) -> Vec<f32> {
    let plane = (image.width() * image.height()) as usize;
    let mut data = vec![0.0f32; plane * 3];
    for (idx, pixel) in image.pixels().enumerate() {
        data[idx] = pixel[0] as f32 / 255.0;
        data[plane + idx] = pixel[1] as f32 / 255.0;
        data[2 * plane + idx] = pixel[2] as f32 / 255.0;
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkerboard(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        })
    }

    #[test]
    fn test_png_data_uri_decodes_back() {
        let image = checkerboard(12, 7);
        let uri = encode_png_data_uri(&image).unwrap();
        assert!(uri.starts_with(PNG_DATA_URI_PREFIX));

        let decoded = decode_image_payload(&uri).unwrap();
        assert_eq!(decoded, image);
    }

    #[test]
    fn test_decode_raw_base64_without_prefix() {
        let image = checkerboard(4, 4);
        let uri = encode_png_data_uri(&image).unwrap();
        let raw = uri.trim_start_matches(PNG_DATA_URI_PREFIX);
        let wrapped = format!("{}\n{}", &raw[..10], &raw[10..]);
        assert_eq!(decode_image_payload(&wrapped).unwrap(), image);
    }

    #[test]
    fn test_decode_rejects_bad_payloads() {
        assert!(matches!(decode_image_payload(""), Err(VisionError::Decode(_))));
        assert!(matches!(decode_image_payload("data:image/png;base64,"), Err(VisionError::Decode(_))));
        assert!(matches!(decode_image_payload("!!!not base64!!!"), Err(VisionError::Decode(_))));
        // valid base64 but not an image
        assert!(matches!(decode_image_payload("aGVsbG8gd29ybGQ="), Err(VisionError::Decode(_))));
    }

    #[test]
    fn test_draw_detections_marks_border_only() {
        let image = RgbImage::from_pixel(20, 20, Rgb([0, 0, 0]));
        let detections = vec![Detection::new([2.0, 3.0, 12.0, 15.0], 0.9)];
        let annotated = draw_detections(&image, &detections, [255, 0, 0], 1);

        assert_eq!(annotated.get_pixel(2, 3), &Rgb([255, 0, 0]));
        assert_eq!(annotated.get_pixel(11, 14), &Rgb([255, 0, 0]));
        assert_eq!(annotated.get_pixel(6, 8), &Rgb([0, 0, 0]));
        // source image untouched
        assert_eq!(image.get_pixel(2, 3), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_draw_detections_tolerates_degenerate_boxes() {
        let image = RgbImage::from_pixel(10, 10, Rgb([0, 0, 0]));
        let detections = vec![
            Detection::new([5.0, 5.0, 5.0, 5.0], 0.5),
            Detection::new([-20.0, -20.0, 50.0, 50.0], 0.5),
        ];
        let annotated = draw_detections(&image, &detections, [0, 255, 0], 3);
        assert_eq!(annotated.dimensions(), (10, 10));
    }

    #[test]
    fn test_draw_detections_clips_huge_boxes() {
        let image = RgbImage::from_pixel(8, 8, Rgb([0, 0, 0]));
        let detections = vec![
            Detection::new([-1e300, -1e300, 1e300, 1e300], 0.5),
            Detection::new([f64::MIN, 2.0, f64::MAX, 6.0], 0.5),
            Detection::new([2.0, 2.0, 6.0, 6.0], 0.5),
        ];
        let annotated = draw_detections(&image, &detections, [0, 0, 255], 1);
        assert_eq!(annotated.dimensions(), (8, 8));
        assert_eq!(annotated.get_pixel(2, 2), &Rgb([0, 0, 255]));
        // edges of the oversized boxes fall outside the image
        assert_eq!(annotated.get_pixel(0, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_letterbox_wide_image() {
        let image = checkerboard(200, 100);
        let boxed = letterbox(&image, 64).unwrap();
        assert_eq!(boxed.image.dimensions(), (64, 64));
        assert_eq!(boxed.scale, 0.32);
        assert_eq!(boxed.pad_x, 0.0);
        assert_eq!(boxed.pad_y, 16.0);
        assert_eq!(boxed.image.get_pixel(0, 0), &LETTERBOX_FILL);

        let (x, y) = boxed.to_original(32.0, 32.0);
        assert!((x - 100.0).abs() < 1e-3);
        assert!((y - 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_letterbox_rejects_empty() {
        let image = RgbImage::new(0, 0);
        assert!(letterbox(&image, 640).is_err());
    }

    #[test]
    fn test_chw_tensor_layout() {
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(0, 0, Rgb([255, 0, 51]));
        image.put_pixel(1, 0, Rgb([0, 255, 102]));
        let data = to_chw_tensor(&image);
        assert_eq!(data.len(), 6);
        assert_eq!(&data[0..2], &[1.0, 0.0]);
        assert_eq!(&data[2..4], &[0.0, 1.0]);
        assert!((data[4] - 0.2).abs() < 1e-6);
        assert!((data[5] - 0.4).abs() < 1e-6);
    }
}
