//! Image preprocessing filters for OCR
//!
//! Turns one captured frame into an ordered set of grayscale variants. Each
//! variant is an independent guess at what will read best: plain luminance,
//! local contrast enhancement, global and adaptive binarization, morphology,
//! edge emphasis and so on. A method that cannot run on a frame is skipped.

use image::{GrayImage, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use serde::{Deserialize, Serialize};
use std::cell::OnceCell;
use tracing::debug;

use crate::capture::Frame;
use crate::config::PreprocessSettings;
use crate::error::PreprocessError;

/// Smallest side length for neighborhood-based methods
const MIN_NEIGHBORHOOD_SIDE: u32 = 3;

/// Offset subtracted from the local mean in adaptive thresholding
const ADAPTIVE_OFFSET: i32 = 2;

/// Named preprocessing method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessMethod {
    /// Plain luminance
    Grayscale,
    /// Contrast-limited adaptive histogram equalization
    Clahe,
    /// Otsu global threshold on the denoised, enhanced image
    ThreshOtsu,
    /// Local mean threshold on the denoised, enhanced image
    ThreshAdaptive,
    /// Inverted Otsu binary (light text on dark plates)
    Inverted,
    /// Morphological close of the Otsu binary
    MorphClose,
    /// Morphological open of the Otsu binary
    MorphOpen,
    /// Enhanced image blended with its Canny edge map
    EdgeBlend,
    /// Percentile contrast stretch
    ContrastStretch,
    /// Gaussian blur followed by Otsu threshold
    BlurThresh,
}

impl PreprocessMethod {
    /// Default run order
    pub const ALL: [PreprocessMethod; 10] = [
        PreprocessMethod::Grayscale,
        PreprocessMethod::Clahe,
        PreprocessMethod::ThreshOtsu,
        PreprocessMethod::ThreshAdaptive,
        PreprocessMethod::Inverted,
        PreprocessMethod::MorphClose,
        PreprocessMethod::MorphOpen,
        PreprocessMethod::EdgeBlend,
        PreprocessMethod::ContrastStretch,
        PreprocessMethod::BlurThresh,
    ];

    /// Tag propagated to candidates
    pub fn name(&self) -> &'static str {
        match self {
            PreprocessMethod::Grayscale => "grayscale",
            PreprocessMethod::Clahe => "clahe",
            PreprocessMethod::ThreshOtsu => "thresh_otsu",
            PreprocessMethod::ThreshAdaptive => "thresh_adaptive",
            PreprocessMethod::Inverted => "inverted",
            PreprocessMethod::MorphClose => "morph_close",
            PreprocessMethod::MorphOpen => "morph_open",
            PreprocessMethod::EdgeBlend => "edge_blend",
            PreprocessMethod::ContrastStretch => "contrast_stretch",
            PreprocessMethod::BlurThresh => "blur_thresh",
        }
    }

    /// Fixed reliability multiplier used by the confidence scorer.
    ///
    /// Cleanly binarized variants read best; heavy blur and edge maps worst.
    pub fn reliability_weight(&self) -> f32 {
        match self {
            PreprocessMethod::MorphClose => 1.15,
            PreprocessMethod::MorphOpen => 1.1,
            PreprocessMethod::Clahe => 1.05,
            PreprocessMethod::ThreshOtsu => 1.05,
            PreprocessMethod::Grayscale => 1.0,
            PreprocessMethod::ThreshAdaptive => 1.0,
            PreprocessMethod::ContrastStretch => 1.0,
            PreprocessMethod::EdgeBlend => 0.95,
            PreprocessMethod::Inverted => 0.9,
            PreprocessMethod::BlurThresh => 0.85,
        }
    }
}

impl std::fmt::Display for PreprocessMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One transformed image derived from a frame
#[derive(Debug, Clone)]
pub struct ImageVariant {
    pub method: PreprocessMethod,
    pub image: GrayImage,
}

/// Produces the ordered variant list for a frame
#[derive(Debug, Clone)]
pub struct Preprocessor {
    settings: PreprocessSettings,
}

impl Preprocessor {
    pub fn new(settings: PreprocessSettings) -> Self {
        Self { settings }
    }

    /// Configured methods, in output order
    pub fn methods(&self) -> &[PreprocessMethod] {
        &self.settings.methods
    }

    /// Preprocess a captured frame
    pub fn preprocess(&self, frame: &Frame) -> Vec<ImageVariant> {
        self.preprocess_image(&frame.image)
    }

    /// Preprocess a raw RGB image
    pub fn preprocess_image(&self, image: &RgbImage) -> Vec<ImageVariant> {
        let stages = self.stages(image);
        self.settings
            .methods
            .iter()
            .filter_map(|&method| stages.variant(method))
            .collect()
    }

    /// Prepare `image` for on-demand variant generation.
    ///
    /// Nothing beyond the grayscale conversion is computed until a method asks
    /// for it, so callers working under a time budget only pay for the
    /// variants they actually use.
    pub fn stages<'a>(&'a self, image: &RgbImage) -> FrameStages<'a> {
        let (width, height) = image.dimensions();
        let stages = if width == 0 || height == 0 {
            debug!("Skipping preprocessing of empty {}x{} image", width, height);
            None
        } else {
            Some(Stages::new(image, &self.settings))
        };
        FrameStages {
            preprocessor: self,
            stages,
        }
    }

    fn apply(&self, method: PreprocessMethod, stages: &Stages<'_>) -> Result<GrayImage, PreprocessError> {
        let s = &self.settings;

        if method != PreprocessMethod::Grayscale {
            require_side(method, &stages.gray, MIN_NEIGHBORHOOD_SIDE)?;
        }

        let image = match method {
            PreprocessMethod::Grayscale => stages.gray.clone(),
            PreprocessMethod::Clahe => stages.enhanced().clone(),
            PreprocessMethod::ThreshOtsu => stages.otsu().clone(),
            PreprocessMethod::ThreshAdaptive => {
                adaptive_threshold(stages.denoised(), s.adaptive_block_radius, ADAPTIVE_OFFSET)
            }
            PreprocessMethod::Inverted => {
                let mut inverted = stages.otsu().clone();
                image::imageops::invert(&mut inverted);
                inverted
            }
            PreprocessMethod::MorphClose => {
                imageproc::morphology::close(stages.otsu(), Norm::LInf, s.morph_radius)
            }
            PreprocessMethod::MorphOpen => {
                imageproc::morphology::open(stages.otsu(), Norm::LInf, s.morph_radius)
            }
            PreprocessMethod::EdgeBlend => {
                if !(s.canny_low >= 0.0 && s.canny_low <= s.canny_high) {
                    return Err(PreprocessError::InvalidParameters {
                        method: method.name(),
                        reason: format!("canny thresholds low {} > high {}", s.canny_low, s.canny_high),
                    });
                }
                let edges = imageproc::edges::canny(stages.enhanced(), s.canny_low, s.canny_high);
                blend(stages.enhanced(), &edges, s.edge_blend_weight)
            }
            PreprocessMethod::ContrastStretch => percentile_stretch(
                &stages.gray,
                s.stretch_low_percentile,
                s.stretch_high_percentile,
            ),
            PreprocessMethod::BlurThresh => {
                let blurred = if s.blur_sigma > 0.0 {
                    imageproc::filter::gaussian_blur_f32(&stages.gray, s.blur_sigma)
                } else {
                    stages.gray.clone()
                };
                otsu_binarize(&blurred)
            }
        };

        Ok(image)
    }
}

/// One frame, ready to produce variants on request
pub struct FrameStages<'a> {
    preprocessor: &'a Preprocessor,
    stages: Option<Stages<'a>>,
}

impl FrameStages<'_> {
    /// Build one variant; `None` when the method cannot run on this frame
    pub fn variant(&self, method: PreprocessMethod) -> Option<ImageVariant> {
        let stages = self.stages.as_ref()?;
        match self.preprocessor.apply(method, stages) {
            Ok(image) => Some(ImageVariant { method, image }),
            Err(e) => {
                debug!("Preprocessing method {} skipped: {}", method, e);
                None
            }
        }
    }
}

/// Intermediate images shared between methods, computed on first use
struct Stages<'a> {
    settings: &'a PreprocessSettings,
    gray: GrayImage,
    enhanced: OnceCell<GrayImage>,
    denoised: OnceCell<GrayImage>,
    otsu: OnceCell<GrayImage>,
}

impl<'a> Stages<'a> {
    fn new(image: &RgbImage, settings: &'a PreprocessSettings) -> Self {
        Self {
            settings,
            gray: image::imageops::grayscale(image),
            enhanced: OnceCell::new(),
            denoised: OnceCell::new(),
            otsu: OnceCell::new(),
        }
    }

    fn enhanced(&self) -> &GrayImage {
        self.enhanced.get_or_init(|| {
            clahe(&self.gray, self.settings.clahe_tiles, self.settings.clahe_clip_limit)
        })
    }

    fn denoised(&self) -> &GrayImage {
        self.denoised.get_or_init(|| {
            let r = self.settings.denoise_radius;
            if r == 0 {
                self.enhanced().clone()
            } else {
                imageproc::filter::median_filter(self.enhanced(), r, r)
            }
        })
    }

    fn otsu(&self) -> &GrayImage {
        self.otsu.get_or_init(|| otsu_binarize(self.denoised()))
    }
}

fn require_side(method: PreprocessMethod, image: &GrayImage, min: u32) -> Result<(), PreprocessError> {
    let (width, height) = image.dimensions();
    if width < min || height < min {
        return Err(PreprocessError::TooSmall {
            method: method.name(),
            width,
            height,
            min,
        });
    }
    Ok(())
}

/// Binarize at the Otsu level
fn otsu_binarize(image: &GrayImage) -> GrayImage {
    let level = imageproc::contrast::otsu_level(image);
    binarize(image, level)
}

/// Pixels strictly above `level` become white
fn binarize(image: &GrayImage, level: u8) -> GrayImage {
    imageproc::map::map_colors(image, |p: Luma<u8>| {
        if p[0] > level {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    })
}

/// Local mean threshold using an integral image.
///
/// A pixel is white when it exceeds the mean of its (2r+1)^2 neighborhood
/// minus `offset`.
fn adaptive_threshold(image: &GrayImage, block_radius: u32, offset: i32) -> GrayImage {
    let (w, h) = image.dimensions();
    let (wu, hu) = (w as usize, h as usize);
    let stride = wu + 1;

    let mut integral = vec![0u64; stride * (hu + 1)];
    for y in 0..hu {
        let mut row_sum = 0u64;
        for x in 0..wu {
            row_sum += image.get_pixel(x as u32, y as u32)[0] as u64;
            integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row_sum;
        }
    }

    let r = block_radius as i64;
    let mut out = GrayImage::new(w, h);
    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let x0 = (x - r).max(0) as usize;
            let y0 = (y - r).max(0) as usize;
            let x1 = ((x + r + 1) as usize).min(wu);
            let y1 = ((y + r + 1) as usize).min(hu);

            let sum = integral[y1 * stride + x1] + integral[y0 * stride + x0]
                - integral[y0 * stride + x1]
                - integral[y1 * stride + x0];
            let count = ((x1 - x0) * (y1 - y0)) as i64;
            let mean = (sum as i64 / count.max(1)) as i32;

            let value = image.get_pixel(x as u32, y as u32)[0] as i32;
            let white = value > mean - offset;
            out.put_pixel(x as u32, y as u32, Luma([if white { 255 } else { 0 }]));
        }
    }
    out
}

/// Contrast-limited adaptive histogram equalization.
///
/// `clip_limit` follows OpenCV: the per-bin cap is `clip_limit * tile_area / 256`.
/// Tile mappings are bilinearly interpolated between tile centers.
pub fn clahe(image: &GrayImage, tiles: u32, clip_limit: f32) -> GrayImage {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return image.clone();
    }

    let tile_w = w.div_ceil(tiles.clamp(1, w));
    let tile_h = h.div_ceil(tiles.clamp(1, h));
    let tiles_x = w.div_ceil(tile_w) as usize;
    let tiles_y = h.div_ceil(tile_h) as usize;

    let mut luts = vec![[0u8; 256]; tiles_x * tiles_y];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx as u32 * tile_w;
            let y0 = ty as u32 * tile_h;
            let x1 = (x0 + tile_w).min(w);
            let y1 = (y0 + tile_h).min(h);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[image.get_pixel(x, y)[0] as usize] += 1;
                }
            }
            let area = (x1 - x0) * (y1 - y0);
            luts[ty * tiles_x + tx] = clipped_equalization(&mut hist, area, clip_limit);
        }
    }

    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        let (ty0, ty1, ay) = interpolation_cell(y, tile_h, tiles_y);
        for x in 0..w {
            let (tx0, tx1, ax) = interpolation_cell(x, tile_w, tiles_x);
            let v = image.get_pixel(x, y)[0] as usize;

            let top = luts[ty0 * tiles_x + tx0][v] as f32 * (1.0 - ax)
                + luts[ty0 * tiles_x + tx1][v] as f32 * ax;
            let bottom = luts[ty1 * tiles_x + tx0][v] as f32 * (1.0 - ax)
                + luts[ty1 * tiles_x + tx1][v] as f32 * ax;
            let value = top * (1.0 - ay) + bottom * ay;

            out.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

/// Clip a tile histogram, redistribute the excess, and return the CDF lookup
fn clipped_equalization(hist: &mut [u32; 256], area: u32, clip_limit: f32) -> [u8; 256] {
    if clip_limit > 0.0 {
        let cap = ((clip_limit * area as f32 / 256.0) as u32).max(1);
        let mut excess = 0u32;
        for bin in hist.iter_mut() {
            if *bin > cap {
                excess += *bin - cap;
                *bin = cap;
            }
        }
        let share = excess / 256;
        let remainder = (excess % 256) as usize;
        for (i, bin) in hist.iter_mut().enumerate() {
            *bin += share + u32::from(i < remainder);
        }
    }

    let mut lut = [0u8; 256];
    let mut cdf = 0u32;
    let scale = 255.0 / area.max(1) as f32;
    for (i, &count) in hist.iter().enumerate() {
        cdf += count;
        lut[i] = (cdf as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Neighboring tile indices and weight for a pixel coordinate
fn interpolation_cell(pos: u32, tile_size: u32, tiles: usize) -> (usize, usize, f32) {
    let f = (pos as f32 + 0.5) / tile_size as f32 - 0.5;
    let last = tiles.saturating_sub(1) as f32;
    let i0 = f.floor().clamp(0.0, last);
    let i1 = (i0 + 1.0).min(last);
    let weight = (f - i0).clamp(0.0, 1.0);
    (i0 as usize, i1 as usize, weight)
}

/// Linearly map the [low, high] percentile range onto [0, 255]
fn percentile_stretch(image: &GrayImage, low_pct: f32, high_pct: f32) -> GrayImage {
    let mut hist = [0u64; 256];
    for p in image.pixels() {
        hist[p[0] as usize] += 1;
    }
    let total: u64 = hist.iter().sum();
    let low = percentile_value(&hist, total, low_pct);
    let high = percentile_value(&hist, total, high_pct);

    if high <= low {
        return image.clone();
    }

    let range = (high - low) as f32;
    imageproc::map::map_colors(image, |p: Luma<u8>| {
        let v = (p[0] as f32 - low as f32) * 255.0 / range;
        Luma([v.round().clamp(0.0, 255.0) as u8])
    })
}

fn percentile_value(hist: &[u64; 256], total: u64, pct: f32) -> u8 {
    let target = (total as f64 * pct.clamp(0.0, 100.0) as f64 / 100.0).ceil() as u64;
    let mut cumulative = 0u64;
    for (value, &count) in hist.iter().enumerate() {
        cumulative += count;
        if cumulative >= target.max(1) {
            return value as u8;
        }
    }
    255
}

/// Weighted sum `base * (1 - w) + overlay * w`
fn blend(base: &GrayImage, overlay: &GrayImage, weight: f32) -> GrayImage {
    let w = weight.clamp(0.0, 1.0);
    let mut out = base.clone();
    for (dst, src) in out.pixels_mut().zip(overlay.pixels()) {
        let v = dst[0] as f32 * (1.0 - w) + src[0] as f32 * w;
        dst[0] = v.round().clamp(0.0, 255.0) as u8;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// Dark "characters" on a light plate with a gradient background
    fn synthetic_plate(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let glyph = (x / 6) % 2 == 0 && y > height / 4 && y < 3 * height / 4;
            if glyph {
                Rgb([20, 20, 20])
            } else {
                let shade = 150 + ((x * 80) / width.max(1)) as u8;
                Rgb([shade, shade, shade])
            }
        })
    }

    fn is_binary(image: &GrayImage) -> bool {
        image.pixels().all(|p| p[0] == 0 || p[0] == 255)
    }

    #[test]
    fn test_all_methods_in_configured_order() {
        let pre = Preprocessor::new(PreprocessSettings::default());
        let variants = pre.preprocess_image(&synthetic_plate(64, 32));

        let methods: Vec<_> = variants.iter().map(|v| v.method).collect();
        assert_eq!(methods, PreprocessMethod::ALL.to_vec());
        for v in &variants {
            assert_eq!(v.image.dimensions(), (64, 32), "{} changed size", v.method);
        }
    }

    #[test]
    fn test_preprocessing_is_deterministic() {
        let pre = Preprocessor::new(PreprocessSettings::default());
        let frame = synthetic_plate(48, 24);
        let a = pre.preprocess_image(&frame);
        let b = pre.preprocess_image(&frame);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.method, y.method);
            assert_eq!(x.image.as_raw(), y.image.as_raw());
        }
    }

    #[test]
    fn test_binary_methods_produce_binary_images() {
        let pre = Preprocessor::new(PreprocessSettings::default());
        let variants = pre.preprocess_image(&synthetic_plate(64, 32));
        for v in variants {
            if matches!(
                v.method,
                PreprocessMethod::ThreshOtsu
                    | PreprocessMethod::ThreshAdaptive
                    | PreprocessMethod::Inverted
                    | PreprocessMethod::BlurThresh
            ) {
                assert!(is_binary(&v.image), "{} is not binary", v.method);
            }
        }
    }

    #[test]
    fn test_inverted_is_complement_of_otsu() {
        let pre = Preprocessor::new(PreprocessSettings {
            methods: vec![PreprocessMethod::ThreshOtsu, PreprocessMethod::Inverted],
            ..Default::default()
        });
        let variants = pre.preprocess_image(&synthetic_plate(40, 20));
        assert_eq!(variants.len(), 2);
        for (a, b) in variants[0].image.pixels().zip(variants[1].image.pixels()) {
            assert_eq!(a[0], 255 - b[0]);
        }
    }

    #[test]
    fn test_tiny_frame_keeps_only_grayscale() {
        let pre = Preprocessor::new(PreprocessSettings::default());
        let variants = pre.preprocess_image(&RgbImage::new(2, 2));
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].method, PreprocessMethod::Grayscale);
    }

    #[test]
    fn test_empty_frame_yields_nothing() {
        let pre = Preprocessor::new(PreprocessSettings::default());
        assert!(pre.preprocess_image(&RgbImage::new(0, 0)).is_empty());
    }

    #[test]
    fn test_clahe_flat_image_stays_flat() {
        let flat = GrayImage::from_pixel(32, 32, Luma([90]));
        let out = clahe(&flat, 4, 3.0);
        let first = out.get_pixel(0, 0)[0];
        assert!(out.pixels().all(|p| p[0] == first));
    }

    #[test]
    fn test_clahe_increases_spread_of_low_contrast_image() {
        let low = GrayImage::from_fn(32, 32, |x, _| Luma([100 + (x % 8) as u8]));
        let out = clahe(&low, 2, 4.0);
        let min = out.pixels().map(|p| p[0]).min().unwrap();
        let max = out.pixels().map(|p| p[0]).max().unwrap();
        assert!(max - min > 7, "spread {} not increased", max - min);
    }

    #[test]
    fn test_percentile_stretch_maps_to_full_range() {
        let img = GrayImage::from_fn(10, 10, |x, _| Luma([100 + x as u8 * 5]));
        let out = percentile_stretch(&img, 0.0, 100.0);
        assert_eq!(out.pixels().map(|p| p[0]).min(), Some(0));
        assert_eq!(out.pixels().map(|p| p[0]).max(), Some(255));
    }

    #[test]
    fn test_adaptive_threshold_separates_dark_spot() {
        let mut img = GrayImage::from_pixel(9, 9, Luma([200]));
        img.put_pixel(4, 4, Luma([10]));
        let out = adaptive_threshold(&img, 2, 2);
        assert_eq!(out.get_pixel(4, 4)[0], 0);
        assert_eq!(out.get_pixel(0, 0)[0], 255);
    }

    #[test]
    fn test_inverted_canny_thresholds_drop_edge_blend() {
        let pre = Preprocessor::new(PreprocessSettings {
            canny_low: 200.0,
            canny_high: 100.0,
            ..Default::default()
        });
        let methods: Vec<_> = pre
            .preprocess_image(&synthetic_plate(48, 24))
            .into_iter()
            .map(|v| v.method)
            .collect();
        assert!(!methods.contains(&PreprocessMethod::EdgeBlend));
        assert_eq!(methods.len(), PreprocessMethod::ALL.len() - 1);
    }

    #[test]
    fn test_stages_build_single_variant_on_demand() {
        let pre = Preprocessor::new(PreprocessSettings::default());
        let image = synthetic_plate(40, 20);
        let stages = pre.stages(&image);

        let close = stages.variant(PreprocessMethod::MorphClose).unwrap();
        let eager = pre
            .preprocess_image(&image)
            .into_iter()
            .find(|v| v.method == PreprocessMethod::MorphClose)
            .unwrap();
        assert_eq!(close.image.as_raw(), eager.image.as_raw());

        assert!(pre.stages(&RgbImage::new(0, 0)).variant(PreprocessMethod::Grayscale).is_none());
    }

    #[test]
    fn test_blend_weights() {
        let base = GrayImage::from_pixel(2, 2, Luma([100]));
        let overlay = GrayImage::from_pixel(2, 2, Luma([200]));
        let out = blend(&base, &overlay, 0.25);
        assert_eq!(out.get_pixel(0, 0)[0], 125);
    }

    #[test]
    fn test_reliability_weights_rank_morphology_above_blur() {
        assert!(PreprocessMethod::MorphClose.reliability_weight() > 1.1);
        assert!(PreprocessMethod::BlurThresh.reliability_weight() < 0.9);
    }
}
