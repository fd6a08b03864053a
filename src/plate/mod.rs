//! Plate Text Layer
//!
//! Cleans raw OCR strings into canonical plate text, checks them against the
//! plate grammar and scores the survivors.

pub mod confusion;
pub mod history;
pub mod normalize;
pub mod score;
pub mod validate;

pub use history::PlateHistory;
pub use normalize::TextNormalizer;
pub use score::ConfidenceScorer;
pub use validate::{PlateValidator, Repair, Validation, PLATE_GRAMMAR};

use serde::Serialize;

use crate::vision::{PreprocessMethod, Region};

/// One OCR read, before any cleanup
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub region: Region,
    pub text: String,
    /// Engine confidence (0.0 - 1.0)
    pub confidence: f32,
    pub method: PreprocessMethod,
}

/// A validated, scored plate reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    /// Canonical plate text
    pub text: String,
    /// Final score (0.0 - 1.0)
    pub score: f32,
    pub method: PreprocessMethod,
    pub raw_confidence: f32,
    /// Bounding box (x, y, width, height)
    pub bounds: (u32, u32, u32, u32),
    pub repair: Repair,
}
