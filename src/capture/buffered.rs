//! Background capture thread feeding a bounded frame queue
//!
//! The producer always keeps the freshest frames: when the queue is full the
//! oldest queued frame is evicted before the new one is pushed.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{Frame, FrameSource};
use crate::error::CaptureError;

type FrameMessage = Result<Frame, CaptureError>;

/// Idle back-off when the wrapped source has nothing ready
const IDLE_BACKOFF: Duration = Duration::from_millis(5);

/// Wraps a [`FrameSource`] so that capture runs on its own thread
pub struct BufferedCapture<S: FrameSource + 'static> {
    source: Option<S>,
    worker: Option<JoinHandle<S>>,
    frames: Option<Receiver<FrameMessage>>,
    stop: Arc<AtomicBool>,
    capacity: usize,
    read_timeout: Duration,
    description: String,
}

impl<S: FrameSource + 'static> BufferedCapture<S> {
    /// Create a buffered wrapper; nothing runs until `open`
    pub fn new(source: S, capacity: usize, read_timeout: Duration) -> Self {
        let description = format!("buffered({})", source.describe());
        Self {
            source: Some(source),
            worker: None,
            frames: None,
            stop: Arc::new(AtomicBool::new(false)),
            capacity: capacity.max(1),
            read_timeout,
            description,
        }
    }

    /// Number of frames currently queued
    pub fn queued(&self) -> usize {
        self.frames.as_ref().map(|rx| rx.len()).unwrap_or(0)
    }
}

impl<S: FrameSource + 'static> FrameSource for BufferedCapture<S> {
    fn open(&mut self) -> Result<(), CaptureError> {
        if self.worker.is_some() {
            return Ok(());
        }

        let mut source = self.source.take().ok_or(CaptureError::Disconnected)?;
        if let Err(e) = source.open() {
            self.source = Some(source);
            return Err(e);
        }

        let (tx, rx) = bounded::<FrameMessage>(self.capacity);
        let evict = rx.clone();
        self.stop.store(false, Ordering::SeqCst);
        let stop = Arc::clone(&self.stop);

        let handle = std::thread::Builder::new()
            .name("frame-capture".to_string())
            .spawn(move || capture_loop(source, tx, evict, stop))
            .map_err(|e| CaptureError::Unavailable(format!("failed to spawn capture thread: {}", e)))?;

        info!("Started capture thread for {}", self.description);
        self.worker = Some(handle);
        self.frames = Some(rx);
        Ok(())
    }

    fn grab(&mut self) -> Result<Option<Frame>, CaptureError> {
        self.grab_within(self.read_timeout)
    }

    /// Waits for the earlier of `wait` and the configured read timeout
    fn grab_within(&mut self, wait: Duration) -> Result<Option<Frame>, CaptureError> {
        let Some(rx) = &self.frames else {
            return Err(CaptureError::NotOpen);
        };

        match rx.recv_timeout(wait.min(self.read_timeout)) {
            Ok(Ok(frame)) => Ok(Some(frame)),
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(CaptureError::Disconnected),
        }
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.frames = None;

        if let Some(handle) = self.worker.take() {
            match handle.join() {
                Ok(source) => self.source = Some(source),
                Err(_) => error!("Capture thread for {} panicked", self.description),
            }
            info!("Stopped capture thread for {}", self.description);
        }
    }

    fn is_open(&self) -> bool {
        self.worker.is_some()
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

impl<S: FrameSource + 'static> Drop for BufferedCapture<S> {
    fn drop(&mut self) {
        self.close();
    }
}

fn capture_loop<S: FrameSource>(
    mut source: S,
    tx: Sender<FrameMessage>,
    evict: Receiver<FrameMessage>,
    stop: Arc<AtomicBool>,
) -> S {
    while !stop.load(Ordering::SeqCst) {
        match source.grab() {
            Ok(Some(frame)) => push_latest(&tx, &evict, Ok(frame)),
            Ok(None) => std::thread::sleep(IDLE_BACKOFF),
            Err(e) => {
                warn!("Capture thread stopping after device error: {}", e);
                push_latest(&tx, &evict, Err(e));
                break;
            }
        }
    }
    source.close();
    debug!("Capture loop exited");
    source
}

fn push_latest(tx: &Sender<FrameMessage>, evict: &Receiver<FrameMessage>, mut message: FrameMessage) {
    loop {
        match tx.try_send(message) {
            Ok(()) => return,
            Err(TrySendError::Full(returned)) => {
                let _ = evict.try_recv();
                message = returned;
            }
            Err(TrySendError::Disconnected(_)) => return,
        }
    }
}
