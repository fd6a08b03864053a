//! Frame Capture Layer
//!
//! Wraps a capturing device behind [`FrameSource`]. The scanner treats every
//! source the same way: open once per activation, pull frames on demand,
//! release deterministically.

pub mod buffered;
#[cfg(feature = "camera")]
pub mod camera;
pub mod frame;

pub use buffered::BufferedCapture;
#[cfg(feature = "camera")]
pub use camera::CameraSource;
pub use frame::Frame;

use image::RgbImage;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::CaptureError;

/// Image file extensions understood by the replay sources
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp", "tif", "tiff"];

/// A device that supplies raster frames on demand
pub trait FrameSource: Send {
    /// Acquire the device
    fn open(&mut self) -> Result<(), CaptureError>;

    /// Pull the next frame.
    ///
    /// `Ok(None)` means nothing is ready yet; `Err` means the device is gone.
    fn grab(&mut self) -> Result<Option<Frame>, CaptureError>;

    /// Like [`grab`](Self::grab), but never blocks for longer than `wait`.
    ///
    /// Sources that return immediately can rely on the default.
    fn grab_within(&mut self, wait: Duration) -> Result<Option<Frame>, CaptureError> {
        let _ = wait;
        self.grab()
    }

    /// Release the device. Must be safe to call repeatedly.
    fn close(&mut self);

    /// Whether the device is currently acquired
    fn is_open(&self) -> bool;

    /// Human-readable description for status reporting
    fn describe(&self) -> String;
}

/// Replays image files from a directory as if they were camera frames
pub struct ImageFolderSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
    sequence: u64,
    looping: bool,
    open: bool,
}

impl ImageFolderSource {
    /// Create a source over `dir`; files are enumerated on `open`
    pub fn new(dir: impl Into<PathBuf>, looping: bool) -> Self {
        Self {
            dir: dir.into(),
            files: Vec::new(),
            cursor: 0,
            sequence: 0,
            looping,
            open: false,
        }
    }

    /// Number of frames available after `open`
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// True if the folder contained no images
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageFolderSource {
    fn open(&mut self) -> Result<(), CaptureError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            CaptureError::Unavailable(format!("cannot read {:?}: {}", self.dir, e))
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_image_file(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(CaptureError::Unavailable(format!(
                "no image files in {:?}",
                self.dir
            )));
        }

        info!("Opened image folder {:?} with {} frames", self.dir, files.len());
        self.files = files;
        self.cursor = 0;
        self.open = true;
        Ok(())
    }

    fn grab(&mut self) -> Result<Option<Frame>, CaptureError> {
        if !self.open {
            return Err(CaptureError::NotOpen);
        }

        if self.cursor >= self.files.len() {
            if !self.looping {
                return Ok(None);
            }
            self.cursor = 0;
        }

        let path = &self.files[self.cursor];
        self.cursor += 1;

        let image = load_rgb(path)?;
        self.sequence += 1;
        debug!("Replayed frame {} from {:?}", self.sequence, path);
        Ok(Some(Frame::new(image, self.sequence)))
    }

    fn close(&mut self) {
        if self.open {
            debug!("Closed image folder {:?}", self.dir);
        }
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn describe(&self) -> String {
        format!("folder:{}", self.dir.display())
    }
}

/// Serves one still image over and over
pub struct StillImageSource {
    origin: String,
    image: Option<RgbImage>,
    path: Option<PathBuf>,
    sequence: u64,
    open: bool,
}

impl StillImageSource {
    /// Serve an image already in memory
    pub fn from_image(image: RgbImage) -> Self {
        Self {
            origin: "memory".to_string(),
            image: Some(image),
            path: None,
            sequence: 0,
            open: false,
        }
    }

    /// Serve an image loaded from disk on `open`
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            origin: path.display().to_string(),
            image: None,
            path: Some(path),
            sequence: 0,
            open: false,
        }
    }
}

impl FrameSource for StillImageSource {
    fn open(&mut self) -> Result<(), CaptureError> {
        if let Some(path) = &self.path {
            self.image = Some(load_rgb(path).map_err(|e| CaptureError::Unavailable(e.to_string()))?);
        }
        if self.image.is_none() {
            return Err(CaptureError::Unavailable("no image loaded".to_string()));
        }
        self.open = true;
        Ok(())
    }

    fn grab(&mut self) -> Result<Option<Frame>, CaptureError> {
        if !self.open {
            return Err(CaptureError::NotOpen);
        }
        let Some(image) = &self.image else {
            return Err(CaptureError::NotOpen);
        };
        self.sequence += 1;
        Ok(Some(Frame::new(image.clone(), self.sequence)))
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn describe(&self) -> String {
        format!("still:{}", self.origin)
    }
}

fn is_image_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
}

fn load_rgb(path: &Path) -> Result<RgbImage, CaptureError> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|e| CaptureError::Read(format!("{:?}: {}", path, e)))
}
