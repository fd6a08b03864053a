//! Vision/OCR Layer
//!
//! Turns captured frames into text: preprocessing variants, tensor
//! preparation, model management and the PaddleOCR recognizer.

pub mod models;
pub mod ocr;
pub mod preprocess;
pub mod tensor;

pub use models::{ModelKind, ModelManager, ModelStatus, OnnxSession};
pub use ocr::{PaddleOcrEngine, Region, TextRecognizer, TextSpot};
pub use preprocess::{ImageVariant, PreprocessMethod, Preprocessor};
