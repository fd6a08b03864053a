//! PlateScanner - license plate recognition from camera frames
//!
//! Frames are preprocessed into several image variants, read by an OCR
//! engine, cleaned up against a plate grammar and scored. A per-scan voter
//! only accepts a plate once it has been seen confidently or consistently.

pub mod capture;
pub mod config;
pub mod error;
pub mod plate;
pub mod scanner;
pub mod storage;
pub mod vision;

pub use capture::{BufferedCapture, Frame, FrameSource, ImageFolderSource, StillImageSource};
#[cfg(feature = "camera")]
pub use capture::CameraSource;
pub use config::{ScannerConfig, ValidationPolicy};
pub use error::{CaptureError, RecognitionError, ScannerError};
pub use plate::{Candidate, PlateValidator, TextNormalizer};
pub use scanner::{CycleOutput, PlateScanner, ScanOutcome, ScannerStatus, SharedScanner};
pub use vision::{PaddleOcrEngine, TextRecognizer};
