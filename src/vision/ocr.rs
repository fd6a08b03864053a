//! OCR (Optical Character Recognition) module
//!
//! Uses PaddleOCR models via ONNX Runtime: a DB network finds text regions,
//! a CRNN network reads each region, and a CTC decoder turns the per-step
//! class probabilities into a string.

use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use ndarray::Array4;
use ort::value::Value;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

use super::models::{ModelKind, ModelManager, OnnxSession};
use super::tensor;
use crate::config::RecognitionSettings;
use crate::error::RecognitionError;

/// Axis-aligned region in variant image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// One recognized text fragment
#[derive(Debug, Clone, PartialEq)]
pub struct TextSpot {
    pub text: String,
    /// Engine confidence (0.0 - 1.0)
    pub confidence: f32,
    pub region: Region,
}

/// Anything that turns a grayscale image into text fragments
pub trait TextRecognizer: Send {
    /// Recognize all text fragments in `image`
    fn recognize(&mut self, image: &GrayImage) -> Result<Vec<TextSpot>, RecognitionError>;

    /// Engine name for status reporting
    fn name(&self) -> &str;
}

/// Parse a character set like `A-Z0-9-` into its members.
///
/// `X-Y` is an inclusive range; a `-` at either end is literal.
pub fn parse_char_set(pattern: &str) -> HashSet<char> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut set = HashSet::new();
    let mut i = 0;

    while i < chars.len() {
        if i + 2 < chars.len() && chars[i + 1] == '-' {
            let (lo, hi) = (chars[i], chars[i + 2]);
            if lo <= hi {
                set.extend(lo..=hi);
            }
            i += 3;
        } else {
            set.insert(chars[i]);
            i += 1;
        }
    }

    set
}

/// CTC class table: index 0 is the blank, then the dictionary characters,
/// then a trailing space
#[derive(Debug, Clone)]
pub struct CharDictionary {
    classes: Vec<char>,
}

impl CharDictionary {
    pub fn from_chars(chars: impl IntoIterator<Item = char>) -> Self {
        let mut classes = vec!['\0'];
        classes.extend(chars);
        classes.push(' ');
        Self { classes }
    }

    /// One character per line
    pub fn from_file(path: &Path) -> Result<Self, RecognitionError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RecognitionError::Dictionary(format!("{:?}: {}", path, e)))?;

        let mut chars = Vec::new();
        for (n, line) in content.lines().enumerate() {
            let mut it = line.trim_end_matches('\r').chars();
            match (it.next(), it.next()) {
                (Some(c), None) => chars.push(c),
                (None, _) => {}
                _ => {
                    return Err(RecognitionError::Dictionary(format!(
                        "line {} holds more than one character",
                        n + 1
                    )))
                }
            }
        }

        if chars.is_empty() {
            return Err(RecognitionError::Dictionary(format!("{:?} is empty", path)));
        }
        Ok(Self::from_chars(chars))
    }

    /// Number of classes, blank included
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.len() <= 1
    }

    pub fn char_at(&self, index: usize) -> Option<char> {
        if index == 0 {
            None
        } else {
            self.classes.get(index).copied()
        }
    }

    /// Per-class mask: blank plus every class whose uppercase form is allowed
    pub fn allowed_mask(&self, allowed: &HashSet<char>) -> Vec<bool> {
        self.classes
            .iter()
            .enumerate()
            .map(|(i, &c)| i == 0 || c.to_uppercase().all(|u| allowed.contains(&u)))
            .collect()
    }
}

/// Greedy CTC decoding over a `[steps, classes]` probability matrix.
///
/// Only classes with `mask[i]` set compete. Repeats collapse and blanks are
/// dropped. Confidence is the mean probability of the emitted characters.
pub fn ctc_greedy_decode(
    probs: &[f32],
    classes: usize,
    dictionary: &CharDictionary,
    mask: &[bool],
) -> (String, f32) {
    let mut text = String::new();
    let mut emitted = Vec::new();
    let mut previous = 0usize;

    if classes == 0 {
        return (text, 0.0);
    }

    for step in probs.chunks_exact(classes) {
        let mut best = 0usize;
        let mut best_prob = f32::NEG_INFINITY;
        for (c, &p) in step.iter().enumerate() {
            if mask.get(c).copied().unwrap_or(false) && p > best_prob {
                best = c;
                best_prob = p;
            }
        }

        if best != 0 && best != previous {
            if let Some(ch) = dictionary.char_at(best) {
                text.push(ch);
                emitted.push(best_prob);
            }
        }
        previous = best;
    }

    let confidence = if emitted.is_empty() {
        0.0
    } else {
        emitted.iter().sum::<f32>() / emitted.len() as f32
    };

    (text, confidence)
}

/// Parameters for turning a DB probability map into boxes
#[derive(Debug, Clone, Copy)]
pub struct BoxParams {
    pub threshold: f32,
    pub box_threshold: f32,
    pub unclip_ratio: f32,
    pub max_boxes: usize,
}

/// Extract text boxes from a `width x height` probability map.
///
/// Boxes are expanded by `area * unclip_ratio / perimeter`, mapped back
/// through `scale_x`/`scale_y`, clipped to `bounds` and returned in reading
/// order (top to bottom, then left to right).
pub fn boxes_from_probability_map(
    map: &[f32],
    width: usize,
    height: usize,
    scale: (f32, f32),
    bounds: (u32, u32),
    params: &BoxParams,
) -> Vec<Region> {
    if width == 0 || height == 0 || map.len() < width * height {
        return vec![];
    }

    let binary = GrayImage::from_fn(width as u32, height as u32, |x, y| {
        let p = map[y as usize * width + x as usize];
        Luma([if p > params.threshold { 255 } else { 0 }])
    });
    let labels = connected_components(&binary, Connectivity::Eight, Luma([0u8]));

    // label -> (min_x, min_y, max_x, max_y, score_sum, pixel_count)
    let mut stats: Vec<(u32, u32, u32, u32, f32, u32)> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0] as usize;
        if label == 0 {
            continue;
        }
        if stats.len() < label {
            stats.resize(label, (u32::MAX, u32::MAX, 0, 0, 0.0, 0));
        }
        let s = &mut stats[label - 1];
        s.0 = s.0.min(x);
        s.1 = s.1.min(y);
        s.2 = s.2.max(x);
        s.3 = s.3.max(y);
        s.4 += map[y as usize * width + x as usize];
        s.5 += 1;
    }

    let (scale_x, scale_y) = scale;
    let (max_w, max_h) = bounds;
    let mut regions = Vec::new();

    for (min_x, min_y, max_x, max_y, score_sum, count) in stats {
        if count == 0 {
            continue;
        }
        let w = (max_x - min_x + 1) as f32;
        let h = (max_y - min_y + 1) as f32;
        if w.min(h) < 3.0 {
            continue;
        }
        if score_sum / (count as f32) < params.box_threshold {
            continue;
        }

        let d = w * h * params.unclip_ratio / (2.0 * (w + h));
        let x0 = ((min_x as f32 - d) / scale_x).max(0.0);
        let y0 = ((min_y as f32 - d) / scale_y).max(0.0);
        let x1 = ((max_x as f32 + 1.0 + d) / scale_x).min(max_w as f32);
        let y1 = ((max_y as f32 + 1.0 + d) / scale_y).min(max_h as f32);

        if x1 - x0 < 1.0 || y1 - y0 < 1.0 {
            continue;
        }
        regions.push(Region {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0).round().max(1.0) as u32,
            height: (y1 - y0).round().max(1.0) as u32,
        });
    }

    regions.sort_by_key(|r| (r.y, r.x));
    regions.truncate(params.max_boxes);
    regions
}

/// PaddleOCR engine (DB detection + CRNN recognition)
pub struct PaddleOcrEngine {
    det: OnnxSession,
    rec: OnnxSession,
    dictionary: CharDictionary,
    mask: Vec<bool>,
    settings: RecognitionSettings,
}

impl PaddleOcrEngine {
    /// Load models from explicit paths
    pub fn from_paths(
        det_path: &Path,
        rec_path: &Path,
        dict_path: &Path,
        settings: RecognitionSettings,
    ) -> Result<Self, RecognitionError> {
        let det = OnnxSession::new(det_path, settings.intra_threads)?;
        let rec = OnnxSession::new(rec_path, settings.intra_threads)?;
        let dictionary = CharDictionary::from_file(dict_path)?;
        let mask = dictionary.allowed_mask(&parse_char_set(&settings.allowed_chars));

        info!(
            "PaddleOCR ready: {} classes, {} allowed",
            dictionary.len(),
            mask.iter().filter(|&&m| m).count()
        );

        Ok(Self {
            det,
            rec,
            dictionary,
            mask,
            settings,
        })
    }

    /// Load (downloading if needed) models through a [`ModelManager`]
    pub fn load(manager: &ModelManager, settings: RecognitionSettings) -> Result<Self, RecognitionError> {
        let ensure = |kind: ModelKind| {
            manager.ensure_model(kind).map_err(|e| RecognitionError::ModelLoad {
                path: manager.model_path(kind).display().to_string(),
                reason: format!("{:#}", e),
            })
        };

        let det = ensure(ModelKind::Detection)?;
        let rec = ensure(ModelKind::Recognition)?;
        let dict = ensure(ModelKind::Dictionary)?;
        Self::from_paths(&det, &rec, &dict, settings)
    }

    fn detect(&mut self, image: &GrayImage) -> Result<Vec<Region>, RecognitionError> {
        let input = tensor::detection_input(image, self.settings.det_limit_side);
        let (shape, map) = run_single(&mut self.det, input.tensor, "detection")?;

        // [1, 1, H, W]
        if shape.len() != 4 {
            return Err(RecognitionError::Shape { stage: "detection", shape });
        }
        let (h, w) = (shape[2].max(0) as usize, shape[3].max(0) as usize);

        let params = BoxParams {
            threshold: self.settings.det_threshold,
            box_threshold: self.settings.box_threshold,
            unclip_ratio: self.settings.unclip_ratio,
            max_boxes: self.settings.max_boxes,
        };
        Ok(boxes_from_probability_map(
            &map,
            w,
            h,
            (input.scale_x, input.scale_y),
            image.dimensions(),
            &params,
        ))
    }

    fn read(&mut self, crop: &GrayImage) -> Result<(String, f32), RecognitionError> {
        let input = tensor::recognition_input(crop, self.settings.rec_height, self.settings.rec_max_width);
        let (shape, probs) = run_single(&mut self.rec, input, "recognition")?;

        // [1, T, C]
        if shape.len() != 3 || shape[2] <= 0 {
            return Err(RecognitionError::Shape { stage: "recognition", shape });
        }
        Ok(ctc_greedy_decode(&probs, shape[2] as usize, &self.dictionary, &self.mask))
    }
}

impl TextRecognizer for PaddleOcrEngine {
    fn recognize(&mut self, image: &GrayImage) -> Result<Vec<TextSpot>, RecognitionError> {
        let regions = self.detect(image)?;
        debug!("Detected {} text regions", regions.len());

        let mut spots = Vec::with_capacity(regions.len());
        for region in regions {
            let crop = image::imageops::crop_imm(image, region.x, region.y, region.width, region.height).to_image();
            let (text, confidence) = self.read(&crop)?;
            if !text.is_empty() {
                spots.push(TextSpot {
                    text,
                    confidence,
                    region,
                });
            }
        }
        Ok(spots)
    }

    fn name(&self) -> &str {
        "paddleocr"
    }
}

/// Run a single-input, single-output model and copy the result out
fn run_single(
    session: &mut OnnxSession,
    input: Array4<f32>,
    stage: &'static str,
) -> Result<(Vec<i64>, Vec<f32>), RecognitionError> {
    let output_name = session
        .primary_output()
        .map(str::to_string)
        .ok_or(RecognitionError::Shape { stage, shape: vec![] })?;

    let input_tensor = Value::from_array(input.into_dyn())?;
    let outputs = session.session_mut().run(ort::inputs![input_tensor])?;
    let output = outputs
        .get(output_name.as_str())
        .ok_or(RecognitionError::Shape { stage, shape: vec![] })?;

    let (shape, data) = output.try_extract_tensor::<f32>()?;
    let dims: Vec<i64> = shape.as_ref().iter().map(|&d| d).collect();
    Ok((dims, data.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plate_dictionary() -> CharDictionary {
        CharDictionary::from_chars("0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz-@".chars())
    }

    /// One-hot probability rows for the given class indices
    fn rows(dict: &CharDictionary, indices: &[usize]) -> Vec<f32> {
        let mut probs = vec![0.0; indices.len() * dict.len()];
        for (t, &i) in indices.iter().enumerate() {
            probs[t * dict.len() + i] = 0.9;
        }
        probs
    }

    fn index_of(dict: &CharDictionary, c: char) -> usize {
        (1..dict.len()).find(|&i| dict.char_at(i) == Some(c)).unwrap()
    }

    #[test]
    fn test_parse_char_set() {
        let set = parse_char_set("A-Z0-9-");
        assert_eq!(set.len(), 26 + 10 + 1);
        assert!(set.contains(&'Q'));
        assert!(set.contains(&'-'));
        assert!(!set.contains(&'a'));
    }

    #[test]
    fn test_ctc_collapses_repeats_and_blanks() {
        let dict = plate_dictionary();
        let mask = vec![true; dict.len()];
        let a = index_of(&dict, 'A');
        let one = index_of(&dict, '1');

        let probs = rows(&dict, &[a, a, 0, a, one, one, 0]);
        let (text, confidence) = ctc_greedy_decode(&probs, dict.len(), &dict, &mask);
        assert_eq!(text, "AA1");
        assert!((confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_ctc_mask_excludes_disallowed_classes() {
        let dict = plate_dictionary();
        let mask = dict.allowed_mask(&parse_char_set("A-Z0-9-"));
        let at = index_of(&dict, '@');
        let b = index_of(&dict, 'B');

        // '@' wins the raw argmax at step 0 but is masked; 'B' is runner-up
        let mut probs = rows(&dict, &[at, b]);
        probs[b] = 0.05;
        let (text, _) = ctc_greedy_decode(&probs, dict.len(), &dict, &mask);
        assert_eq!(text, "B");
    }

    #[test]
    fn test_lowercase_allowed_through_uppercase() {
        let dict = plate_dictionary();
        let mask = dict.allowed_mask(&parse_char_set("A-Z0-9-"));
        assert!(mask[index_of(&dict, 'l')]);
        assert!(!mask[index_of(&dict, '@')]);
        assert!(!mask[dict.len() - 1], "space must be masked");
    }

    #[test]
    fn test_ctc_empty_output() {
        let dict = plate_dictionary();
        let mask = vec![true; dict.len()];
        let probs = rows(&dict, &[0, 0, 0]);
        assert_eq!(ctc_greedy_decode(&probs, dict.len(), &dict, &mask), (String::new(), 0.0));
    }

    #[test]
    fn test_dictionary_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dict.txt");
        std::fs::write(&path, "0\n1\nA\n").unwrap();

        let dict = CharDictionary::from_file(&path).unwrap();
        assert_eq!(dict.len(), 5);
        assert_eq!(dict.char_at(0), None);
        assert_eq!(dict.char_at(3), Some('A'));
        assert_eq!(dict.char_at(4), Some(' '));

        std::fs::write(&path, "AB\n").unwrap();
        assert!(matches!(CharDictionary::from_file(&path), Err(RecognitionError::Dictionary(_))));
    }

    #[test]
    fn test_boxes_from_probability_map() {
        let (w, h) = (40usize, 20usize);
        let mut map = vec![0.0f32; w * h];
        // Two blobs: a strong one and a weak one
        for y in 5..10 {
            for x in 20..30 {
                map[y * w + x] = 0.9;
            }
            for x in 2..8 {
                map[y * w + x] = 0.4;
            }
        }

        let params = BoxParams {
            threshold: 0.3,
            box_threshold: 0.6,
            unclip_ratio: 1.5,
            max_boxes: 20,
        };
        let boxes = boxes_from_probability_map(&map, w, h, (2.0, 2.0), (20, 10), &params);

        assert_eq!(boxes.len(), 1, "weak blob must be dropped");
        let b = boxes[0];
        assert!(b.x < 10 && b.x + b.width <= 20);
        assert!(b.width >= 5);
    }

    #[test]
    fn test_boxes_reading_order_and_limit() {
        let (w, h) = (30usize, 30usize);
        let mut map = vec![0.0f32; w * h];
        for &(ox, oy) in &[(20usize, 2usize), (2, 2), (2, 20)] {
            for y in oy..oy + 5 {
                for x in ox..ox + 5 {
                    map[y * w + x] = 1.0;
                }
            }
        }

        let params = BoxParams {
            threshold: 0.3,
            box_threshold: 0.6,
            unclip_ratio: 0.0,
            max_boxes: 2,
        };
        let boxes = boxes_from_probability_map(&map, w, h, (1.0, 1.0), (30, 30), &params);
        assert_eq!(boxes.len(), 2);
        assert_eq!((boxes[0].x, boxes[0].y), (2, 2));
        assert_eq!((boxes[1].x, boxes[1].y), (20, 2));
    }
}
