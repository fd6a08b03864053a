//! Plate Scanner
//!
//! Owns the frame source, the recognition pipeline and the rolling history.
//! A scan polls frames cooperatively until the consistency voter accepts a
//! plate or the timeout elapses.

pub mod pipeline;
pub mod shared;
pub mod voter;

pub use pipeline::RecognitionPipeline;
pub use shared::SharedScanner;
pub use voter::{Acceptance, AcceptanceReason, AcceptanceRecord, ScanSession, VoterState};

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn};

use crate::capture::{Frame, FrameSource};
use crate::config::{ScannerConfig, ValidationPolicy};
use crate::error::{CaptureError, ScannerError};
use crate::plate::{Candidate, PlateHistory};
use crate::vision::TextRecognizer;

/// Result of a single observation cycle
#[derive(Debug, Clone, Default)]
pub struct CycleOutput {
    pub frame: Option<Arc<Frame>>,
    pub candidates: Vec<Candidate>,
}

/// An accepted plate
#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub session_id: String,
    pub plate: String,
    pub candidate: Candidate,
    pub sightings: u32,
    pub average_score: f32,
    pub reason: AcceptanceReason,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
    #[serde(skip)]
    pub frame: Arc<Frame>,
}

/// Voting and confidence thresholds in effect
#[derive(Debug, Clone, Serialize)]
pub struct Thresholds {
    pub min_confidence: f32,
    pub excellent: f32,
    pub high: f32,
    pub minimum: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct BufferSizes {
    pub history_len: usize,
    pub history_capacity: usize,
}

/// Side-effect-free snapshot of the scanner
#[derive(Debug, Clone, Serialize)]
pub struct ScannerStatus {
    pub connected: bool,
    pub active: bool,
    pub last_error: Option<String>,
    pub source: String,
    pub recognizer: String,
    pub validation_policy: ValidationPolicy,
    pub frames_processed: u64,
    pub last_frame_size: Option<(u32, u32)>,
    pub thresholds: Thresholds,
    pub buffer_sizes: BufferSizes,
}

pub struct PlateScanner {
    config: ScannerConfig,
    source: Box<dyn FrameSource>,
    pipeline: RecognitionPipeline,
    history: PlateHistory,
    active: bool,
    last_error: Option<String>,
    frames_processed: u64,
    last_frame_size: Option<(u32, u32)>,
}

impl PlateScanner {
    pub fn new(
        config: ScannerConfig,
        source: Box<dyn FrameSource>,
        recognizer: Box<dyn TextRecognizer>,
    ) -> Result<Self, ScannerError> {
        config.validate().map_err(ScannerError::Config)?;
        let pipeline = RecognitionPipeline::new(&config, recognizer)?;
        let history = PlateHistory::new(config.voting.history_capacity);

        Ok(Self {
            config,
            source,
            pipeline,
            history,
            active: false,
            last_error: None,
            frames_processed: 0,
            last_frame_size: None,
        })
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn history(&self) -> &PlateHistory {
        &self.history
    }

    pub fn pipeline(&self) -> &RecognitionPipeline {
        &self.pipeline
    }

    /// Acquire the frame source
    pub fn start(&mut self) -> Result<(), ScannerError> {
        if self.active {
            return Ok(());
        }

        match self.source.open() {
            Ok(()) => {
                self.active = true;
                self.last_error = None;
                info!("Scanner started on {}", self.source.describe());
                Ok(())
            }
            Err(e) => {
                error!("Failed to start scanner on {}: {}", self.source.describe(), e);
                self.last_error = Some(e.to_string());
                Err(ScannerError::Device(e))
            }
        }
    }

    /// Release the frame source; safe to call repeatedly
    pub fn stop(&mut self) {
        if self.source.is_open() {
            self.source.close();
        }
        if self.active {
            info!("Scanner stopped");
        }
        self.active = false;
    }

    /// Run one frame through the pipeline. Device errors stop the scanner
    /// and yield an empty output.
    pub fn observe_one_cycle(&mut self) -> CycleOutput {
        if !self.active {
            warn!("observe_one_cycle called on an inactive scanner");
            return CycleOutput::default();
        }

        match self.source.grab() {
            Ok(Some(frame)) => {
                let frame = Arc::new(frame);
                let candidates = self.process(&frame);
                CycleOutput {
                    frame: Some(frame),
                    candidates,
                }
            }
            Ok(None) => CycleOutput::default(),
            Err(e) => {
                self.fail(e);
                CycleOutput::default()
            }
        }
    }

    /// Poll frames until a plate is accepted or `timeout` elapses
    pub fn scan_for_plate(&mut self, timeout: Duration) -> Option<ScanOutcome> {
        if !self.active {
            warn!("scan_for_plate called on an inactive scanner");
            return None;
        }

        let mut session = ScanSession::new(self.config.voting.clone());
        let span = info_span!("scan", session = %session.id());
        let _guard = span.enter();

        let started = Instant::now();
        let stride = u64::from(self.config.capture.frame_stride.max(1));
        let poll = Duration::from_millis(self.config.capture.poll_interval_ms);
        let mut grabbed: u64 = 0;

        info!("Scanning for a plate (timeout {:?})", timeout);

        loop {
            if started.elapsed() >= timeout {
                session.time_out();
                info!("No plate accepted within {:?} ({} cycles)", timeout, session.cycles());
                return None;
            }

            let remaining = timeout.saturating_sub(started.elapsed());
            match self.source.grab_within(remaining) {
                Ok(Some(frame)) => {
                    grabbed += 1;
                    if (grabbed - 1) % stride == 0 {
                        let frame = Arc::new(frame);
                        let candidates = self.process(&frame);
                        if let Some(accepted) = session.observe(frame, &candidates) {
                            return Some(ScanOutcome {
                                session_id: session.id().to_string(),
                                plate: accepted.text,
                                sightings: accepted.record.count,
                                average_score: accepted.record.average(),
                                reason: accepted.reason,
                                elapsed: started.elapsed(),
                                frame: accepted.record.last_frame,
                                candidate: accepted.record.last_candidate,
                            });
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    self.fail(e);
                    session.time_out();
                    return None;
                }
            }

            let remaining = timeout.saturating_sub(started.elapsed());
            std::thread::sleep(poll.min(remaining));
        }
    }

    pub fn status(&self) -> ScannerStatus {
        let voting = &self.config.voting;
        ScannerStatus {
            connected: self.source.is_open(),
            active: self.active,
            last_error: self.last_error.clone(),
            source: self.source.describe(),
            recognizer: self.pipeline.recognizer_name().to_string(),
            validation_policy: self.pipeline.validator().policy(),
            frames_processed: self.frames_processed,
            last_frame_size: self.last_frame_size,
            thresholds: Thresholds {
                min_confidence: self.config.recognition.min_confidence,
                excellent: voting.excellent_threshold,
                high: voting.high_threshold,
                minimum: voting.minimum_threshold,
            },
            buffer_sizes: BufferSizes {
                history_len: self.history.len(),
                history_capacity: self.history.capacity(),
            },
        }
    }

    /// Pipeline run plus history update; the bonus applies from the next cycle on
    fn process(&mut self, frame: &Frame) -> Vec<Candidate> {
        self.frames_processed += 1;
        self.last_frame_size = Some(frame.dimensions());

        let candidates = self.pipeline.run(frame, &self.history);
        for candidate in &candidates {
            self.history.push(candidate.text.clone());
        }

        debug!(
            "Cycle on frame {} produced {} candidates",
            frame.sequence,
            candidates.len()
        );
        candidates
    }

    fn fail(&mut self, e: CaptureError) {
        error!("Frame source failed: {}", e);
        self.last_error = Some(e.to_string());
        self.stop();
    }
}

impl Drop for PlateScanner {
    fn drop(&mut self) {
        self.stop();
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}
