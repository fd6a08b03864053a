//! Model management for ONNX Runtime
//!
//! Handles downloading, caching, and loading of the PaddleOCR models used by
//! the plate recognizer.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use ort::session::{builder::GraphOptimizationLevel, Session};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;
use tracing::{debug, info};

use crate::error::RecognitionError;

/// Environment variable that disables network downloads
pub const OFFLINE_ENV: &str = "PLATE_SCANNER_OFFLINE";

const MANIFEST_FILE: &str = "manifest.json";

/// PaddleOCR components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Text detection model (DBNet)
    Detection,
    /// Text recognition model (CRNN)
    Recognition,
    /// Character dictionary for recognition
    Dictionary,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [ModelKind::Detection, ModelKind::Recognition, ModelKind::Dictionary];

    /// Get the filename for this model
    pub fn filename(&self) -> &'static str {
        match self {
            ModelKind::Detection => "det.onnx",
            ModelKind::Recognition => "rec.onnx",
            ModelKind::Dictionary => "dict.txt",
        }
    }

    /// Download URL (monkt/paddleocr-onnx on Hugging Face)
    pub fn download_url(&self) -> &'static str {
        match self {
            ModelKind::Detection => {
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/detection/v3/det.onnx"
            }
            ModelKind::Recognition => {
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/english/rec.onnx"
            }
            ModelKind::Dictionary => {
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/english/dict.txt"
            }
        }
    }

    /// Plausible file size range in bytes
    pub fn expected_size_range(&self) -> (u64, u64) {
        match self {
            ModelKind::Detection => (2_000_000, 5_000_000),    // ~2.43 MB
            ModelKind::Recognition => (7_000_000, 10_000_000), // ~7.83 MB
            ModelKind::Dictionary => (100, 10_000),            // ~1.42 KB
        }
    }

    /// Display name for progress reporting
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelKind::Detection => "Text Detection",
            ModelKind::Recognition => "Text Recognition",
            ModelKind::Dictionary => "Character Dictionary",
        }
    }
}

/// Model manifest tracking downloaded models
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub kind: String,
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: String,
    /// Unix seconds
    pub downloaded_at: u64,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            models: Vec::new(),
        }
    }
}

/// Availability of one model file
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub kind: ModelKind,
    pub path: PathBuf,
    pub available: bool,
    pub size_bytes: Option<u64>,
}

/// Downloads and caches ONNX models
pub struct ModelManager {
    models_dir: PathBuf,
    offline: bool,
}

impl ModelManager {
    /// Manager over the default per-user models directory
    pub fn new() -> Result<Self> {
        Self::with_dir(crate::storage::get_models_dir()?)
    }

    /// Manager over a custom directory
    pub fn with_dir(models_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create models directory {:?}", models_dir))?;
        Ok(Self {
            models_dir,
            offline: std::env::var_os(OFFLINE_ENV).is_some(),
        })
    }

    /// Refuse (or allow) network downloads
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    /// Get the models directory path
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Get the path to a specific model file
    pub fn model_path(&self, kind: ModelKind) -> PathBuf {
        self.models_dir.join(kind.filename())
    }

    /// Check if a model is present with a plausible size
    pub fn is_model_available(&self, kind: ModelKind) -> bool {
        match std::fs::metadata(self.model_path(kind)) {
            Ok(metadata) => {
                let (min, max) = kind.expected_size_range();
                (min..=max).contains(&metadata.len())
            }
            Err(_) => false,
        }
    }

    /// Check if every model the recognizer needs is available
    pub fn are_models_ready(&self) -> bool {
        ModelKind::ALL.iter().all(|&kind| self.is_model_available(kind))
    }

    /// Status of all models
    pub fn model_status(&self) -> Vec<ModelStatus> {
        ModelKind::ALL
            .iter()
            .map(|&kind| {
                let path = self.model_path(kind);
                let size_bytes = std::fs::metadata(&path).ok().map(|m| m.len());
                ModelStatus {
                    kind,
                    available: self.is_model_available(kind),
                    path,
                    size_bytes,
                }
            })
            .collect()
    }

    /// Download a model if not already available; returns its path
    pub fn ensure_model(&self, kind: ModelKind) -> Result<PathBuf> {
        let path = self.model_path(kind);

        if self.is_model_available(kind) {
            debug!("Model {:?} already available at {:?}", kind, path);
            return Ok(path);
        }

        self.download_model(kind)?;
        Ok(path)
    }

    /// Download every missing model
    pub fn ensure_all_models(&self) -> Result<()> {
        for kind in ModelKind::ALL {
            self.ensure_model(kind)?;
        }
        Ok(())
    }

    /// Download a specific model (blocking)
    pub fn download_model(&self, kind: ModelKind) -> Result<()> {
        let url = kind.download_url();
        let path = self.model_path(kind);

        if self.offline {
            anyhow::bail!(
                "Offline mode: cannot download models. Please download manually from {} and place at {:?}",
                url,
                path
            );
        }

        info!("Downloading {} model from {}", kind.display_name(), url);

        let rt = Runtime::new().context("Failed to create tokio runtime")?;
        let sha256 = rt.block_on(download_file(url, &path))?;

        if !self.is_model_available(kind) {
            anyhow::bail!("Download completed but model verification failed");
        }

        self.record_download(kind, sha256)?;

        info!("Successfully downloaded {} model", kind.display_name());
        Ok(())
    }

    /// Update manifest after a successful download
    fn record_download(&self, kind: ModelKind, sha256: String) -> Result<()> {
        let mut manifest = self.load_manifest().unwrap_or_default();
        let metadata = std::fs::metadata(self.model_path(kind))?;

        let info = ModelInfo {
            kind: format!("{:?}", kind),
            filename: kind.filename().to_string(),
            size_bytes: metadata.len(),
            sha256,
            downloaded_at: unix_now(),
        };

        if let Some(existing) = manifest.models.iter_mut().find(|m| m.filename == info.filename) {
            *existing = info;
        } else {
            manifest.models.push(info);
        }

        self.save_manifest(&manifest)
    }

    /// Load the model manifest
    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let manifest_path = self.models_dir.join(MANIFEST_FILE);
        if manifest_path.exists() {
            let content = std::fs::read_to_string(&manifest_path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(ModelManifest::default())
        }
    }

    /// Save the model manifest
    pub fn save_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        let content = serde_json::to_string_pretty(manifest)?;
        std::fs::write(self.models_dir.join(MANIFEST_FILE), content)?;
        Ok(())
    }
}

/// Stream `url` into `path` via a temp file; returns the hex SHA-256
async fn download_file(url: &str, path: &Path) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()
        .context("Failed to create HTTP client")?;

    let response = client
        .get(url)
        .send()
        .await
        .context("Failed to send download request")?;

    if !response.status().is_success() {
        anyhow::bail!("Download failed with status {}: {}", response.status(), url);
    }

    let total_size = response.content_length();
    debug!("Download size: {:?} bytes", total_size);

    let temp_path = path.with_extension("tmp");
    let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;

    let mut hasher = Sha256::new();
    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Error reading download stream")?;
        file.write_all(&chunk).context("Failed to write to temp file")?;
        hasher.update(&chunk);
        downloaded += chunk.len() as u64;
    }

    file.flush().context("Failed to flush temp file")?;
    drop(file);
    debug!("Downloaded {} bytes from {}", downloaded, url);

    std::fs::rename(&temp_path, path).context("Failed to move downloaded file to final location")?;

    Ok(format!("{:x}", hasher.finalize()))
}

fn load_error<E: std::fmt::Display>(path: &Path) -> impl Fn(E) -> RecognitionError + '_ {
    move |e| RecognitionError::ModelLoad {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// ONNX Runtime session wrapper
pub struct OnnxSession {
    session: Session,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl OnnxSession {
    /// Create a CPU session from a model file
    pub fn new(model_path: &Path, intra_threads: usize) -> Result<Self, RecognitionError> {
        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()
            .map_err(load_error(model_path))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(load_error(model_path))?
            .with_intra_threads(intra_threads.max(1))
            .map_err(load_error(model_path))?
            .commit_from_file(model_path)
            .map_err(load_error(model_path))?;

        let input_names: Vec<String> = session.inputs.iter().map(|input| input.name.clone()).collect();
        let output_names: Vec<String> = session.outputs.iter().map(|output| output.name.clone()).collect();

        info!("Model loaded. Inputs: {:?}, Outputs: {:?}", input_names, output_names);

        Ok(Self {
            session,
            input_names,
            output_names,
        })
    }

    /// Get the underlying session mutably for running inference
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Get input names
    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    /// First output name, if the model declares any
    pub fn primary_output(&self) -> Option<&str> {
        self.output_names.first().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_model_filenames() {
        assert_eq!(ModelKind::Detection.filename(), "det.onnx");
        assert_eq!(ModelKind::Recognition.filename(), "rec.onnx");
        assert_eq!(ModelKind::Dictionary.filename(), "dict.txt");
    }

    #[test]
    fn test_missing_models_not_ready() {
        let dir = tempdir().unwrap();
        let manager = ModelManager::with_dir(dir.path().join("models")).unwrap();
        assert!(!manager.are_models_ready());

        let status = manager.model_status();
        assert_eq!(status.len(), 3);
        assert!(status.iter().all(|s| !s.available && s.size_bytes.is_none()));
    }

    #[test]
    fn test_truncated_model_is_unavailable() {
        let dir = tempdir().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();
        std::fs::write(manager.model_path(ModelKind::Detection), b"partial").unwrap();

        assert!(!manager.is_model_available(ModelKind::Detection));
        let status = manager.model_status();
        assert_eq!(status[0].size_bytes, Some(7));
    }

    #[test]
    fn test_dictionary_size_check() {
        let dir = tempdir().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();
        let dict: String = ('!'..='~').map(|c| format!("{}\n", c)).collect();
        std::fs::write(manager.model_path(ModelKind::Dictionary), dict).unwrap();
        assert!(manager.is_model_available(ModelKind::Dictionary));
    }

    #[test]
    fn test_offline_refuses_download() {
        let dir = tempdir().unwrap();
        let mut manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();
        manager.set_offline(true);

        let err = manager.ensure_model(ModelKind::Recognition).unwrap_err();
        assert!(err.to_string().contains("Offline mode"));
    }

    #[test]
    fn test_manifest_roundtrip() {
        let dir = tempdir().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();
        assert!(manager.load_manifest().unwrap().models.is_empty());

        let mut manifest = ModelManifest::default();
        manifest.models.push(ModelInfo {
            kind: "Detection".to_string(),
            filename: "det.onnx".to_string(),
            size_bytes: 42,
            sha256: "abc".to_string(),
            downloaded_at: 1,
        });
        manager.save_manifest(&manifest).unwrap();

        let loaded = manager.load_manifest().unwrap();
        assert_eq!(loaded.models.len(), 1);
        assert_eq!(loaded.models[0].size_bytes, 42);
    }
}
