//! Per-frame recognition pipeline
//!
//! preprocess -> recognize (under a wall-clock budget) -> normalize ->
//! validate -> score -> dedup. Failures inside one variant are logged and
//! that variant is dropped; nothing here returns an error to the caller.

use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::capture::Frame;
use crate::config::ScannerConfig;
use crate::error::ScannerError;
use crate::plate::{Candidate, ConfidenceScorer, PlateHistory, PlateValidator, RawDetection, TextNormalizer};
use crate::vision::{Preprocessor, TextRecognizer};

pub struct RecognitionPipeline {
    preprocessor: Preprocessor,
    recognizer: Box<dyn TextRecognizer>,
    normalizer: TextNormalizer,
    validator: PlateValidator,
    scorer: ConfidenceScorer,
    min_confidence: f32,
    time_budget: Duration,
}

impl RecognitionPipeline {
    pub fn new(config: &ScannerConfig, recognizer: Box<dyn TextRecognizer>) -> Result<Self, ScannerError> {
        Ok(Self {
            preprocessor: Preprocessor::new(config.preprocess.clone()),
            recognizer,
            normalizer: TextNormalizer::new(&config.text),
            validator: PlateValidator::new(config.validation.policy)?
                .with_length_bounds(config.text.min_len, config.text.max_len),
            scorer: ConfidenceScorer::new(config.scoring.clone()),
            min_confidence: config.recognition.min_confidence,
            time_budget: Duration::from_millis(config.recognition.time_budget_ms),
        })
    }

    pub fn recognizer_name(&self) -> &str {
        self.recognizer.name()
    }

    pub fn normalizer(&self) -> &TextNormalizer {
        &self.normalizer
    }

    pub fn validator(&self) -> &PlateValidator {
        &self.validator
    }

    /// Run every variant through the recognizer until the time budget runs out.
    ///
    /// Variants are built one at a time, right before they are recognized, and
    /// the budget is checked before each one. The first recognizer call always
    /// goes ahead; a call already in flight always completes.
    pub fn detect(&mut self, frame: &Frame) -> Vec<RawDetection> {
        let started = Instant::now();
        let stages = self.preprocessor.stages(&frame.image);
        let total = self.preprocessor.methods().len();
        let mut launched = 0usize;
        let mut detections = Vec::new();

        for &method in self.preprocessor.methods() {
            if launched > 0 && started.elapsed() >= self.time_budget {
                debug!(
                    "Time budget of {:?} exhausted after {}/{} variants",
                    self.time_budget, launched, total
                );
                break;
            }

            let Some(variant) = stages.variant(method) else {
                continue;
            };
            launched += 1;

            match self.recognizer.recognize(&variant.image) {
                Ok(spots) => {
                    for spot in spots {
                        if spot.confidence < self.min_confidence {
                            trace!("Dropped {:?} at {:.2} from {}", spot.text, spot.confidence, method);
                            continue;
                        }
                        detections.push(RawDetection {
                            region: spot.region,
                            text: spot.text,
                            confidence: spot.confidence,
                            method,
                        });
                    }
                }
                Err(e) => warn!("Recognition failed on {} variant: {}", method, e),
            }
        }

        debug!(
            "Frame {}: {} detections from {} variants in {:?}",
            frame.sequence,
            detections.len(),
            launched,
            started.elapsed()
        );
        detections
    }

    /// Normalize, validate and score detections; one candidate per text,
    /// highest score first
    pub fn candidates(&self, detections: &[RawDetection], history: &PlateHistory) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = Vec::new();

        for detection in detections {
            let Some(canonical) = self.normalizer.normalize(&detection.text) else {
                continue;
            };
            let Some(validation) = self.validator.validate_detailed(&canonical) else {
                continue;
            };

            let score = self
                .scorer
                .score(detection.confidence, detection.method, &validation.text, history);
            let region = detection.region;
            let candidate = Candidate {
                text: validation.text,
                score,
                method: detection.method,
                raw_confidence: detection.confidence,
                bounds: (region.x, region.y, region.width, region.height),
                repair: validation.repair,
            };

            match candidates.iter_mut().find(|c| c.text == candidate.text) {
                Some(existing) if existing.score < candidate.score => *existing = candidate,
                Some(_) => {}
                None => candidates.push(candidate),
            }
        }

        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates
    }

    /// Full single-frame run
    pub fn run(&mut self, frame: &Frame, history: &PlateHistory) -> Vec<Candidate> {
        let detections = self.detect(frame);
        self.candidates(&detections, history)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::RecognitionError;
    use crate::vision::{PreprocessMethod, Region, TextSpot};
    use image::{GrayImage, RgbImage};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Replays scripted results, one entry per call; empty once exhausted
    pub(crate) struct ScriptedRecognizer {
        pub script: VecDeque<Result<Vec<TextSpot>, RecognitionError>>,
        pub calls: Arc<AtomicUsize>,
        pub delay: Duration,
    }

    impl ScriptedRecognizer {
        pub fn new(script: Vec<Result<Vec<TextSpot>, RecognitionError>>) -> Self {
            Self {
                script: script.into(),
                calls: Arc::new(AtomicUsize::new(0)),
                delay: Duration::ZERO,
            }
        }
    }

    impl TextRecognizer for ScriptedRecognizer {
        fn recognize(&mut self, _image: &GrayImage) -> Result<Vec<TextSpot>, RecognitionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            self.script.pop_front().unwrap_or_else(|| Ok(vec![]))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    pub(crate) fn spot(text: &str, confidence: f32) -> TextSpot {
        TextSpot {
            text: text.to_string(),
            confidence,
            region: Region { x: 1, y: 2, width: 30, height: 10 },
        }
    }

    fn config_with_methods(methods: Vec<PreprocessMethod>) -> ScannerConfig {
        let mut config = ScannerConfig::default();
        config.preprocess.methods = methods;
        config
    }

    fn frame() -> Frame {
        Frame::new(RgbImage::new(32, 16), 1)
    }

    #[test]
    fn test_end_to_end_raw_text() {
        let recognizer = ScriptedRecognizer::new(vec![Ok(vec![spot("AB C-l23", 0.8)])]);
        let config = config_with_methods(vec![PreprocessMethod::MorphClose]);
        let mut pipeline = RecognitionPipeline::new(&config, Box::new(recognizer)).unwrap();

        let candidates = pipeline.run(&frame(), &PlateHistory::new(10));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].text, "ABC-123");
        assert_eq!(candidates[0].method, PreprocessMethod::MorphClose);
        assert_eq!(candidates[0].bounds, (1, 2, 30, 10));
    }

    #[test]
    fn test_low_confidence_and_invalid_dropped() {
        let recognizer = ScriptedRecognizer::new(vec![Ok(vec![
            spot("ABC-1234", 0.2),
            spot("HELLO", 0.9),
            spot("XYZ-5678", 0.6),
        ])]);
        let config = config_with_methods(vec![PreprocessMethod::Grayscale]);
        let mut pipeline = RecognitionPipeline::new(&config, Box::new(recognizer)).unwrap();

        let detections = pipeline.detect(&frame());
        assert_eq!(detections.len(), 2, "0.2 is below the confidence floor");

        let candidates = pipeline.candidates(&detections, &PlateHistory::new(10));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].text, "XYZ-5678");
    }

    #[test]
    fn test_dedup_keeps_best_and_sorts() {
        let recognizer = ScriptedRecognizer::new(vec![
            Ok(vec![spot("ABC-1234", 0.5), spot("XYZ-5678", 0.4)]),
            Ok(vec![spot("abc 1234", 0.7)]),
        ]);
        let config = config_with_methods(vec![PreprocessMethod::Grayscale, PreprocessMethod::Clahe]);
        let mut pipeline = RecognitionPipeline::new(&config, Box::new(recognizer)).unwrap();

        let candidates = pipeline.run(&frame(), &PlateHistory::new(10));
        let texts: Vec<_> = candidates.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["ABC1234", "ABC-1234", "XYZ-5678"]);

        let recognizer = ScriptedRecognizer::new(vec![
            Ok(vec![spot("ABC-1234", 0.5)]),
            Ok(vec![spot("ABC-1234", 0.7)]),
        ]);
        let mut pipeline = RecognitionPipeline::new(&config, Box::new(recognizer)).unwrap();
        let candidates = pipeline.run(&frame(), &PlateHistory::new(10));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].raw_confidence, 0.7);
        assert_eq!(candidates[0].method, PreprocessMethod::Clahe);
    }

    #[test]
    fn test_recognition_error_skips_variant() {
        let recognizer = ScriptedRecognizer::new(vec![
            Err(RecognitionError::Dictionary("broken".to_string())),
            Ok(vec![spot("ABC-1234", 0.6)]),
        ]);
        let config = config_with_methods(vec![PreprocessMethod::Grayscale, PreprocessMethod::Clahe]);
        let mut pipeline = RecognitionPipeline::new(&config, Box::new(recognizer)).unwrap();

        let candidates = pipeline.run(&frame(), &PlateHistory::new(10));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].method, PreprocessMethod::Clahe);
    }

    #[test]
    fn test_time_budget_stops_new_variants() {
        let mut recognizer = ScriptedRecognizer::new(vec![]);
        recognizer.delay = Duration::from_millis(40);
        let calls = Arc::clone(&recognizer.calls);

        let mut config = ScannerConfig::default();
        config.recognition.time_budget_ms = 60;
        let mut pipeline = RecognitionPipeline::new(&config, Box::new(recognizer)).unwrap();

        pipeline.detect(&frame());
        let made = calls.load(Ordering::SeqCst);
        assert!(made >= 1, "the first variant always runs");
        assert!(made < PreprocessMethod::ALL.len(), "made {made} calls");
    }

    #[test]
    fn test_zero_budget_still_recognizes_first_variant() {
        let recognizer = ScriptedRecognizer::new(vec![Ok(vec![spot("ABC-1234", 0.9)])]);
        let calls = Arc::clone(&recognizer.calls);

        let mut config = ScannerConfig::default();
        config.recognition.time_budget_ms = 0;
        let mut pipeline = RecognitionPipeline::new(&config, Box::new(recognizer)).unwrap();

        let big = Frame::new(RgbImage::new(640, 480), 1);
        let candidates = pipeline.run(&big, &PlateHistory::new(10));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].method, PreprocessMethod::Grayscale);
    }

    #[test]
    fn test_first_launch_skips_unusable_methods() {
        // A 2x2 frame only supports grayscale; the budget must not stop it
        let recognizer = ScriptedRecognizer::new(vec![Ok(vec![spot("XYZ-5678", 0.9)])]);
        let calls = Arc::clone(&recognizer.calls);

        let mut config = config_with_methods(vec![PreprocessMethod::MorphClose, PreprocessMethod::Grayscale]);
        config.recognition.time_budget_ms = 0;
        let mut pipeline = RecognitionPipeline::new(&config, Box::new(recognizer)).unwrap();

        let detections = pipeline.detect(&Frame::new(RgbImage::new(2, 2), 1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(detections[0].method, PreprocessMethod::Grayscale);
    }
}
