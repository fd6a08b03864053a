//! Consistency voting across cycles of one scan session
//!
//! A session starts in `Collecting`. Each cycle folds the cycle's candidates
//! into per-text records and then checks the records in first-seen order.
//! The first text that clears a bar moves the session to `Accepted`; running
//! out of time moves it to `TimedOut`. Both are terminal.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::capture::Frame;
use crate::config::VotingSettings;
use crate::plate::Candidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoterState {
    Collecting,
    Accepted,
    TimedOut,
}

/// Which bar a text cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptanceReason {
    /// One sighting above the excellent threshold
    Excellent,
    /// Two or more sightings averaging above the high threshold
    Corroborated,
    /// Three or more sightings averaging above the minimum threshold
    Persistent,
}

/// Running evidence for one text
#[derive(Debug, Clone)]
pub struct AcceptanceRecord {
    pub count: u32,
    pub cumulative: f32,
    pub max: f32,
    pub last_frame: Arc<Frame>,
    pub last_candidate: Candidate,
}

impl AcceptanceRecord {
    pub fn average(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            self.cumulative / self.count as f32
        }
    }
}

/// The text a session settled on
#[derive(Debug, Clone)]
pub struct Acceptance {
    pub text: String,
    pub reason: AcceptanceReason,
    pub record: AcceptanceRecord,
}

pub struct ScanSession {
    id: Uuid,
    settings: VotingSettings,
    /// First-seen order
    records: Vec<(String, AcceptanceRecord)>,
    state: VoterState,
    cycles: u32,
}

impl ScanSession {
    pub fn new(settings: VotingSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            settings,
            records: Vec::new(),
            state: VoterState::Collecting,
            cycles: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> VoterState {
        self.state
    }

    /// Cycles folded in so far
    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub fn record(&self, text: &str) -> Option<&AcceptanceRecord> {
        self.records.iter().find(|(t, _)| t == text).map(|(_, r)| r)
    }

    /// Tracked texts in first-seen order
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|(t, _)| t.as_str())
    }

    /// Fold one cycle in; returns the acceptance if this cycle produced one
    pub fn observe(&mut self, frame: Arc<Frame>, candidates: &[Candidate]) -> Option<Acceptance> {
        if self.state != VoterState::Collecting {
            return None;
        }
        self.cycles += 1;

        for candidate in candidates {
            match self.records.iter_mut().find(|(t, _)| *t == candidate.text) {
                Some((_, record)) => {
                    record.count += 1;
                    record.cumulative += candidate.score;
                    record.max = record.max.max(candidate.score);
                    record.last_frame = Arc::clone(&frame);
                    record.last_candidate = candidate.clone();
                }
                None => self.records.push((
                    candidate.text.clone(),
                    AcceptanceRecord {
                        count: 1,
                        cumulative: candidate.score,
                        max: candidate.score,
                        last_frame: Arc::clone(&frame),
                        last_candidate: candidate.clone(),
                    },
                )),
            }
        }

        let (text, record, reason) = self
            .records
            .iter()
            .find_map(|(text, record)| self.evaluate(record).map(|reason| (text, record, reason)))?;

        let acceptance = Acceptance {
            text: text.clone(),
            reason,
            record: record.clone(),
        };
        self.state = VoterState::Accepted;

        info!(
            session = %self.id,
            "Accepted {} after {} sightings (avg {:.3}, max {:.3}, {:?})",
            acceptance.text,
            acceptance.record.count,
            acceptance.record.average(),
            acceptance.record.max,
            reason
        );
        Some(acceptance)
    }

    /// Close a session that is still collecting
    pub fn time_out(&mut self) {
        if self.state == VoterState::Collecting {
            self.state = VoterState::TimedOut;
            debug!(session = %self.id, "Timed out after {} cycles tracking {} texts", self.cycles, self.records.len());
        }
    }

    fn evaluate(&self, record: &AcceptanceRecord) -> Option<AcceptanceReason> {
        let s = &self.settings;
        let average = record.average();

        if record.max > s.excellent_threshold {
            Some(AcceptanceReason::Excellent)
        } else if record.count >= 2 && average > s.high_threshold {
            Some(AcceptanceReason::Corroborated)
        } else if record.count >= 3 && average > s.minimum_threshold {
            Some(AcceptanceReason::Persistent)
        } else {
            None
        }
    }
}
