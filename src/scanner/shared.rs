//! Shared access to one scanner across threads
//!
//! A device supports one scan session at a time, so callers check the
//! scanner out for the duration of their session.

use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::PlateScanner;
use crate::error::ScannerError;

#[derive(Clone)]
pub struct SharedScanner {
    inner: Arc<Mutex<PlateScanner>>,
}

impl SharedScanner {
    pub fn new(scanner: PlateScanner) -> Self {
        Self {
            inner: Arc::new(Mutex::new(scanner)),
        }
    }

    /// Exclusive access, waiting at most `wait` for the current holder
    pub fn checkout(&self, wait: Duration) -> Result<MutexGuard<'_, PlateScanner>, ScannerError> {
        match self.inner.try_lock_for(wait) {
            Some(guard) => Ok(guard),
            None => {
                debug!("Scanner still checked out after {:?}", wait);
                Err(ScannerError::Busy)
            }
        }
    }

    /// Whether another caller currently holds the scanner
    pub fn is_checked_out(&self) -> bool {
        self.inner.is_locked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::StillImageSource;
    use crate::config::ScannerConfig;
    use crate::scanner::pipeline::tests::ScriptedRecognizer;
    use image::RgbImage;
    use std::sync::mpsc;

    fn shared() -> SharedScanner {
        let scanner = PlateScanner::new(
            ScannerConfig::default(),
            Box::new(StillImageSource::from_image(RgbImage::new(8, 8))),
            Box::new(ScriptedRecognizer::new(vec![])),
        )
        .unwrap();
        SharedScanner::new(scanner)
    }

    #[test]
    fn test_checkout_and_release() {
        let scanner = shared();
        {
            let mut guard = scanner.checkout(Duration::from_millis(10)).unwrap();
            guard.start().unwrap();
            assert!(scanner.is_checked_out());
        }
        assert!(!scanner.is_checked_out());
        assert!(scanner.checkout(Duration::ZERO).unwrap().is_active());
    }

    #[test]
    fn test_second_checkout_is_busy() {
        let scanner = shared();
        let other = scanner.clone();
        let (held_tx, held_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let holder = std::thread::spawn(move || {
            let _guard = other.checkout(Duration::from_secs(1)).unwrap();
            held_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        });

        held_rx.recv().unwrap();
        assert!(matches!(
            scanner.checkout(Duration::from_millis(20)),
            Err(ScannerError::Busy)
        ));

        release_tx.send(()).unwrap();
        holder.join().unwrap();
        assert!(scanner.checkout(Duration::from_millis(100)).is_ok());
    }
}
