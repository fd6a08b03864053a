//! Heuristic confidence scoring
//!
//! The score is a weighted product, not a calibrated probability:
//! raw confidence x method reliability x length band x character mix x
//! history bonus, capped at 1.0.

use super::history::PlateHistory;
use crate::config::ScoringSettings;
use crate::vision::PreprocessMethod;

#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    settings: ScoringSettings,
}

impl ConfidenceScorer {
    pub fn new(settings: ScoringSettings) -> Self {
        Self { settings }
    }

    /// Final score in [0, 1]
    pub fn score(
        &self,
        raw_confidence: f32,
        method: PreprocessMethod,
        text: &str,
        history: &PlateHistory,
    ) -> f32 {
        let raw = if raw_confidence.is_nan() {
            0.0
        } else {
            raw_confidence.clamp(0.0, 1.0)
        };

        let score = raw
            * method.reliability_weight()
            * self.length_factor(text)
            * self.mix_factor(text)
            * self.history_factor(text, history);

        score.clamp(0.0, 1.0)
    }

    fn length_factor(&self, text: &str) -> f32 {
        let len = text.chars().filter(|c| c.is_ascii_alphanumeric()).count();
        if (self.settings.typical_len_min..=self.settings.typical_len_max).contains(&len) {
            self.settings.length_boost
        } else {
            self.settings.length_penalty
        }
    }

    fn mix_factor(&self, text: &str) -> f32 {
        let letters = text.chars().any(|c| c.is_ascii_alphabetic());
        let digits = text.chars().any(|c| c.is_ascii_digit());
        if letters && digits {
            self.settings.mixed_boost
        } else {
            self.settings.uniform_penalty
        }
    }

    fn history_factor(&self, text: &str, history: &PlateHistory) -> f32 {
        if history.contains(text) {
            self.settings.history_bonus
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> ConfidenceScorer {
        ConfidenceScorer::new(ScoringSettings::default())
    }

    #[test]
    fn test_score_never_exceeds_one() {
        let s = scorer();
        let mut history = PlateHistory::new(4);
        history.push("ABC-1234");
        for raw in [0.0, 0.5, 0.99, 1.0, 5.0, f32::INFINITY, f32::NAN, -1.0] {
            for method in PreprocessMethod::ALL {
                for text in ["ABC-1234", "ABCDEF", "123-4567", "AB-12345678"] {
                    let score = s.score(raw, method, text, &history);
                    assert!((0.0..=1.0).contains(&score), "{raw} {method} {text} -> {score}");
                }
            }
        }
    }

    #[test]
    fn test_reference_product() {
        // 0.6 x 1.15 (morph_close) x 1.1 (7 chars) x 1.1 (mixed)
        let score = scorer().score(0.6, PreprocessMethod::MorphClose, "ABC-1234", &PlateHistory::new(4));
        assert!((score - 0.6 * 1.15 * 1.1 * 1.1).abs() < 1e-5);
    }

    #[test]
    fn test_method_weight_ordering() {
        let s = scorer();
        let h = PlateHistory::new(4);
        let close = s.score(0.5, PreprocessMethod::MorphClose, "ABC-1234", &h);
        let blur = s.score(0.5, PreprocessMethod::BlurThresh, "ABC-1234", &h);
        assert!(close > blur);
    }

    #[test]
    fn test_mixed_and_length_heuristics() {
        let s = scorer();
        let h = PlateHistory::new(4);
        let mixed = s.score(0.5, PreprocessMethod::Grayscale, "ABC-1234", &h);
        let digits = s.score(0.5, PreprocessMethod::Grayscale, "123-4567", &h);
        let short = s.score(0.5, PreprocessMethod::Grayscale, "AB12", &h);
        assert!(mixed > digits);
        assert!(mixed > short);
    }

    #[test]
    fn test_history_bonus() {
        let s = scorer();
        let mut h = PlateHistory::new(4);
        let before = s.score(0.5, PreprocessMethod::Grayscale, "XYZ-5678", &h);
        h.push("XYZ-5678");
        let after = s.score(0.5, PreprocessMethod::Grayscale, "XYZ-5678", &h);
        assert!((after / before - 1.15).abs() < 1e-4);
    }
}
