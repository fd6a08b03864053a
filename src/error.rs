//! Error types for the plate recognition pipeline
//!
//! Only device failures at `start()` are meant to reach callers as hard errors.
//! Everything raised inside a scan cycle is logged and absorbed by the scanner.

use thiserror::Error;

/// Frame source (camera / replay device) failures
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture device unavailable: {0}")]
    Unavailable(String),
    #[error("failed to read frame: {0}")]
    Read(String),
    #[error("capture device is not open")]
    NotOpen,
    #[error("capture thread disconnected")]
    Disconnected,
}

/// OCR engine failures, always scoped to a single preprocessing variant
#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("failed to load model {path}: {reason}")]
    ModelLoad { path: String, reason: String },
    #[error("inference failed: {0}")]
    Inference(#[from] ort::Error),
    #[error("unexpected tensor shape {shape:?} from {stage}")]
    Shape { stage: &'static str, shape: Vec<i64> },
    #[error("invalid character dictionary: {0}")]
    Dictionary(String),
}

/// A preprocessing method could not be applied to a frame
#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("image {width}x{height} is smaller than the {min}px minimum for {method}")]
    TooSmall {
        method: &'static str,
        width: u32,
        height: u32,
        min: u32,
    },
    #[error("invalid parameters for {method}: {reason}")]
    InvalidParameters { method: &'static str, reason: String },
}

/// Errors surfaced by the scanner's public API
#[derive(Debug, Error)]
pub enum ScannerError {
    #[error(transparent)]
    Device(#[from] CaptureError),
    #[error("invalid plate pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("scanner is busy with another session")]
    Busy,
    #[error("invalid configuration: {0}")]
    Config(String),
}
