//! Live camera source backed by OpenCV's `VideoCapture`

use image::RgbImage;
use opencv::prelude::*;
use opencv::videoio::{VideoCapture, CAP_ANY};
use tracing::{info, warn};

use super::{Frame, FrameSource};
use crate::error::CaptureError;

/// A local capture device addressed by its OpenCV index
pub struct CameraSource {
    index: i32,
    capture: Option<VideoCapture>,
    sequence: u64,
}

impl CameraSource {
    pub fn new(index: i32) -> Self {
        Self {
            index,
            capture: None,
            sequence: 0,
        }
    }
}

// SAFETY: the capture handle is only touched through `&mut self`, so it is
// never used from two threads at once.
unsafe impl Send for CameraSource {}

impl FrameSource for CameraSource {
    fn open(&mut self) -> Result<(), CaptureError> {
        if self.capture.is_some() {
            return Ok(());
        }

        let capture = VideoCapture::new(self.index, CAP_ANY)
            .map_err(|e| CaptureError::Unavailable(format!("camera {}: {}", self.index, e)))?;
        let opened = capture
            .is_opened()
            .map_err(|e| CaptureError::Unavailable(format!("camera {}: {}", self.index, e)))?;
        if !opened {
            return Err(CaptureError::Unavailable(format!("camera {} could not be opened", self.index)));
        }

        info!("Opened camera {}", self.index);
        self.capture = Some(capture);
        Ok(())
    }

    fn grab(&mut self) -> Result<Option<Frame>, CaptureError> {
        let Some(capture) = self.capture.as_mut() else {
            return Err(CaptureError::NotOpen);
        };

        let mut mat = Mat::default();
        let grabbed = capture.read(&mut mat).map_err(|e| CaptureError::Read(e.to_string()))?;
        if !grabbed || mat.empty() {
            return Err(CaptureError::Read(format!("camera {} returned an empty frame", self.index)));
        }

        let image = mat_to_rgb(&mat)?;
        self.sequence += 1;
        Ok(Some(Frame::new(image, self.sequence)))
    }

    fn close(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.release() {
                warn!("Failed to release camera {}: {}", self.index, e);
            }
            info!("Released camera {}", self.index);
        }
    }

    fn is_open(&self) -> bool {
        self.capture.is_some()
    }

    fn describe(&self) -> String {
        format!("camera:{}", self.index)
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Copy an 8-bit BGR `Mat` into an RGB image
fn mat_to_rgb(mat: &Mat) -> Result<RgbImage, CaptureError> {
    if mat.channels() != 3 {
        return Err(CaptureError::Read(format!("expected 3 channels, got {}", mat.channels())));
    }

    let owned;
    let mat = if mat.is_continuous() {
        mat
    } else {
        owned = mat.try_clone().map_err(|e| CaptureError::Read(e.to_string()))?;
        &owned
    };

    let bytes = mat.data_bytes().map_err(|e| CaptureError::Read(e.to_string()))?;
    bgr_to_rgb(mat.cols() as u32, mat.rows() as u32, bytes)
}

fn bgr_to_rgb(width: u32, height: u32, bgr: &[u8]) -> Result<RgbImage, CaptureError> {
    let mut rgb = Vec::with_capacity(bgr.len());
    for px in bgr.chunks_exact(3) {
        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| CaptureError::Read(format!("frame buffer does not fit {}x{}", width, height)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grab_before_open() {
        let mut camera = CameraSource::new(0);
        assert!(!camera.is_open());
        assert!(matches!(camera.grab(), Err(CaptureError::NotOpen)));
        camera.close();
        assert_eq!(camera.describe(), "camera:0");
    }

    #[test]
    fn test_missing_device_is_unavailable() {
        let mut camera = CameraSource::new(97);
        assert!(matches!(camera.open(), Err(CaptureError::Unavailable(_))));
        assert!(!camera.is_open());
    }

    #[test]
    fn test_bgr_to_rgb_swaps_channels() {
        let image = bgr_to_rgb(2, 1, &[1, 2, 3, 10, 20, 30]).unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [3, 2, 1]);
        assert_eq!(image.get_pixel(1, 0).0, [30, 20, 10]);

        assert!(matches!(bgr_to_rgb(2, 2, &[0; 6]), Err(CaptureError::Read(_))));
    }

    #[test]
    fn test_mat_conversion() {
        let bgr = opencv::core::Scalar::new(10.0, 20.0, 30.0, 0.0);
        let mat = Mat::new_rows_cols_with_default(2, 3, opencv::core::CV_8UC3, bgr).unwrap();
        let image = mat_to_rgb(&mat).unwrap();
        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(image.get_pixel(2, 1).0, [30, 20, 10]);
    }
}
