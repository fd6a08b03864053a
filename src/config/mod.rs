//! Scanner Configuration
//!
//! Pipeline thresholds and tuning stored in TOML format.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::vision::PreprocessMethod;

/// Scanner settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Frame acquisition settings
    pub capture: CaptureSettings,
    /// Image variant generation settings
    pub preprocess: PreprocessSettings,
    /// OCR engine settings
    pub recognition: RecognitionSettings,
    /// Text normalization bounds
    pub text: TextSettings,
    /// Plate validation settings
    pub validation: ValidationSettings,
    /// Confidence scoring heuristics
    pub scoring: ScoringSettings,
    /// Consistency voting thresholds
    pub voting: VotingSettings,
}

/// Capture-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Process every Nth frame during a scan (1 = every frame)
    pub frame_stride: u32,
    /// Sleep between scan cycles in milliseconds
    pub poll_interval_ms: u64,
    /// Maximum time a single device read may block
    pub read_timeout_ms: u64,
    /// Queue depth for buffered capture
    pub buffer_frames: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            frame_stride: 1,
            poll_interval_ms: 50,
            read_timeout_ms: 500,
            buffer_frames: 4,
        }
    }
}

/// Preprocessing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessSettings {
    /// Methods to run, in order
    pub methods: Vec<PreprocessMethod>,
    /// CLAHE clip limit (OpenCV semantics)
    pub clahe_clip_limit: f32,
    /// CLAHE tile grid size (tiles per axis)
    pub clahe_tiles: u32,
    /// Median filter radius used before thresholding
    pub denoise_radius: u32,
    /// Block radius for adaptive thresholding
    pub adaptive_block_radius: u32,
    /// Structuring element radius for morphology
    pub morph_radius: u8,
    /// Canny low threshold
    pub canny_low: f32,
    /// Canny high threshold
    pub canny_high: f32,
    /// Weight of the edge map in the edge blend (0.0 - 1.0)
    pub edge_blend_weight: f32,
    /// Gaussian sigma for blur-then-threshold
    pub blur_sigma: f32,
    /// Lower percentile for contrast stretch
    pub stretch_low_percentile: f32,
    /// Upper percentile for contrast stretch
    pub stretch_high_percentile: f32,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            methods: PreprocessMethod::ALL.to_vec(),
            clahe_clip_limit: 3.0,
            clahe_tiles: 8,
            denoise_radius: 1,
            adaptive_block_radius: 5,
            morph_radius: 1,
            canny_low: 50.0,
            canny_high: 150.0,
            edge_blend_weight: 0.3,
            blur_sigma: 1.5,
            stretch_low_percentile: 2.0,
            stretch_high_percentile: 98.0,
        }
    }
}

/// OCR engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionSettings {
    /// Model directory (defaults to the application data directory)
    pub model_dir: Option<PathBuf>,
    /// Detections below this raw confidence are dropped immediately
    pub min_confidence: f32,
    /// Wall-clock budget for all variants of one frame
    pub time_budget_ms: u64,
    /// Longest image side fed to the detector
    pub det_limit_side: u32,
    /// Probability threshold for the detection bitmap
    pub det_threshold: f32,
    /// Minimum mean probability for a detected box
    pub box_threshold: f32,
    /// Box expansion ratio
    pub unclip_ratio: f32,
    /// Maximum text boxes per variant
    pub max_boxes: usize,
    /// Recognition input height
    pub rec_height: u32,
    /// Recognition input maximum width
    pub rec_max_width: u32,
    /// Characters the recognizer may emit
    pub allowed_chars: String,
    /// Number of intra-operation threads
    pub intra_threads: usize,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            model_dir: None,
            min_confidence: 0.3,
            time_budget_ms: 600,
            det_limit_side: 960,
            det_threshold: 0.3,
            box_threshold: 0.6,
            unclip_ratio: 1.5,
            max_boxes: 20,
            rec_height: 48,
            rec_max_width: 320,
            allowed_chars: "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-".to_string(),
            intra_threads: 4,
        }
    }
}

/// Text normalization bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextSettings {
    /// Shortest accepted canonical text
    pub min_len: usize,
    /// Longest accepted canonical text
    pub max_len: usize,
}

impl Default for TextSettings {
    fn default() -> Self {
        Self { min_len: 3, max_len: 12 }
    }
}

/// Plate validation policy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPolicy {
    /// Grammar match with bounded single-edit repair
    #[default]
    Grammar,
    /// Legacy: grammar first, then any alphanumeric text of length 2-8
    AlphanumericFallback,
}

/// Validation settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    pub policy: ValidationPolicy,
}

/// Confidence scoring heuristics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSettings {
    /// Shortest "typical" plate (alphanumeric characters, hyphens excluded)
    pub typical_len_min: usize,
    /// Longest "typical" plate
    pub typical_len_max: usize,
    /// Multiplier for texts inside the typical band
    pub length_boost: f32,
    /// Multiplier for texts outside the typical band
    pub length_penalty: f32,
    /// Multiplier for texts mixing letters and digits
    pub mixed_boost: f32,
    /// Multiplier for all-letter or all-digit texts
    pub uniform_penalty: f32,
    /// Multiplier when the text is already in the rolling history
    pub history_bonus: f32,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            typical_len_min: 5,
            typical_len_max: 8,
            length_boost: 1.1,
            length_penalty: 0.9,
            mixed_boost: 1.1,
            uniform_penalty: 0.8,
            history_bonus: 1.15,
        }
    }
}

/// Consistency voting thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VotingSettings {
    /// A single sighting above this score is accepted outright
    pub excellent_threshold: f32,
    /// Two sightings averaging above this score are accepted
    pub high_threshold: f32,
    /// Three sightings averaging above this score are accepted
    pub minimum_threshold: f32,
    /// Capacity of the rolling history of recent plate texts
    pub history_capacity: usize,
}

impl Default for VotingSettings {
    fn default() -> Self {
        Self {
            excellent_threshold: 0.85,
            high_threshold: 0.7,
            minimum_threshold: 0.25,
            history_capacity: 10,
        }
    }
}

impl ScannerConfig {
    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.text.min_len == 0 || self.text.min_len > self.text.max_len {
            return Err(format!(
                "text length bounds [{}, {}] are empty",
                self.text.min_len, self.text.max_len
            ));
        }
        let p = &self.preprocess;
        if !(p.canny_low >= 0.0 && p.canny_low <= p.canny_high) {
            return Err(format!(
                "preprocess canny thresholds must satisfy 0 <= low <= high (got {}, {})",
                p.canny_low, p.canny_high
            ));
        }
        if self.capture.frame_stride == 0 {
            return Err("capture.frame_stride must be at least 1".to_string());
        }
        let v = &self.voting;
        if !(v.minimum_threshold <= v.high_threshold && v.high_threshold <= v.excellent_threshold) {
            return Err(format!(
                "voting thresholds must satisfy minimum <= high <= excellent (got {}, {}, {})",
                v.minimum_threshold, v.high_threshold, v.excellent_threshold
            ));
        }
        if v.history_capacity == 0 {
            return Err("voting.history_capacity must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<ScannerConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    let config: ScannerConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {:?}", path))?;
    config.validate().map_err(anyhow::Error::msg)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &ScannerConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
