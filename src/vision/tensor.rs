//! Tensor preparation for the OCR models
//!
//! Handles resizing, normalization, and NCHW conversion for the PaddleOCR
//! detection and recognition networks.

use image::imageops::FilterType;
use image::GrayImage;
use ndarray::{Array3, Array4};

/// ImageNet statistics used by the DB detection network [R, G, B]
pub const DET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const DET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// The recognition network maps [0, 255] to [-1, 1]
pub const REC_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
pub const REC_STD: [f32; 3] = [0.5, 0.5, 0.5];

/// Detection input sides must be multiples of this
const DET_ALIGN: u32 = 32;

/// Narrowest crop handed to the recognizer
const REC_MIN_WIDTH: u32 = 8;

/// Detection input plus the factors needed to map boxes back
#[derive(Debug, Clone)]
pub struct DetectionInput {
    pub tensor: Array4<f32>,
    /// resized / original, per axis
    pub scale_x: f32,
    pub scale_y: f32,
}

/// Replicate a grayscale image into three channels, scaled to 0-1
pub fn gray_to_rgb_f32(image: &GrayImage) -> Array3<f32> {
    let (w, h) = image.dimensions();
    Array3::<f32>::from_shape_fn((h as usize, w as usize, 3), |(y, x, _)| {
        image.get_pixel(x as u32, y as u32)[0] as f32 / 255.0
    })
}

/// Normalize image with mean and std
pub fn normalize(image: &Array3<f32>, mean: &[f32; 3], std: &[f32; 3]) -> Array3<f32> {
    let (h, w, _) = image.dim();
    let mut normalized = Array3::<f32>::zeros((h, w, 3));

    for y in 0..h {
        for x in 0..w {
            for c in 0..3 {
                normalized[[y, x, c]] = (image[[y, x, c]] - mean[c]) / std[c];
            }
        }
    }

    normalized
}

/// Convert HWC image to NCHW tensor (batch size 1)
pub fn hwc_to_nchw(image: &Array3<f32>) -> Array4<f32> {
    let (h, w, c) = image.dim();
    let mut tensor = Array4::<f32>::zeros((1, c, h, w));

    for y in 0..h {
        for x in 0..w {
            for ch in 0..c {
                tensor[[0, ch, y, x]] = image[[y, x, ch]];
            }
        }
    }

    tensor
}

/// Target size for the detector: longest side capped at `limit_side`,
/// both sides rounded to a multiple of 32
pub fn detection_size(width: u32, height: u32, limit_side: u32) -> (u32, u32) {
    let longest = width.max(height).max(1) as f32;
    let ratio = if longest > limit_side as f32 {
        limit_side as f32 / longest
    } else {
        1.0
    };

    let align = |side: u32| -> u32 {
        let scaled = (side as f32 * ratio / DET_ALIGN as f32).round() as u32 * DET_ALIGN;
        scaled.max(DET_ALIGN)
    };

    (align(width), align(height))
}

/// Full preprocessing for detection
pub fn detection_input(image: &GrayImage, limit_side: u32) -> DetectionInput {
    let (w, h) = image.dimensions();
    let (new_w, new_h) = detection_size(w, h, limit_side);
    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let rgb = gray_to_rgb_f32(&resized);
    let normalized = normalize(&rgb, &DET_MEAN, &DET_STD);

    DetectionInput {
        tensor: hwc_to_nchw(&normalized),
        scale_x: new_w as f32 / w.max(1) as f32,
        scale_y: new_h as f32 / h.max(1) as f32,
    }
}

/// Full preprocessing for recognition: fixed height, aspect-preserving width
pub fn recognition_input(crop: &GrayImage, target_height: u32, max_width: u32) -> Array4<f32> {
    let (w, h) = crop.dimensions();
    let ratio = w as f32 / h.max(1) as f32;
    let new_w = ((target_height as f32 * ratio).ceil() as u32).clamp(REC_MIN_WIDTH, max_width.max(REC_MIN_WIDTH));

    let resized = image::imageops::resize(crop, new_w, target_height, FilterType::Triangle);
    let rgb = gray_to_rgb_f32(&resized);
    let normalized = normalize(&rgb, &REC_MEAN, &REC_STD);

    hwc_to_nchw(&normalized)
}
