//! Polling state machine and frame deduplication
//!
//! Consecutive polls deliberately overlap: every poll re-reports some frames
//! the previous one already returned, so that no frame is lost at a poll
//! boundary. A running watermark of the latest accepted present time drops the
//! repeats and keeps the accepted timeline strictly increasing.

use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

use super::parser::{LatencyDump, RawSample};

/// Present time reported for frames whose fence has not signaled yet.
pub const PENDING_FENCE: i64 = i64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerPhase {
    /// No frame data seen yet
    NotStarted,
    /// Frames are being reported
    Running,
    /// The monitored layer disappeared while running
    Terminated,
    /// Sampling was ended by the orchestrator
    Stopped,
}

impl SamplerPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, SamplerPhase::Terminated | SamplerPhase::Stopped)
    }
}

impl fmt::Display for SamplerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplerPhase::NotStarted => write!(f, "not started"),
            SamplerPhase::Running => write!(f, "running"),
            SamplerPhase::Terminated => write!(f, "terminated"),
            SamplerPhase::Stopped => write!(f, "stopped"),
        }
    }
}

/// An accepted frame. Both timestamps are nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameRecord {
    pub present_ns: i64,
    pub ready_ns: i64,
}

/// What a single poll did to the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Only the vsync line came back before any frame was seen
    NotRendering,
    /// The first line was not a vsync period; nothing was recorded
    Malformed,
    /// Frame data was processed
    Sampled { accepted: usize, overlap: bool },
    /// Only the vsync line came back after frames had been seen
    Terminated,
    /// The state is already terminal
    Ignored,
}

/// Mutable state of one sampled run.
#[derive(Debug, Clone)]
pub struct SamplerState {
    phase: SamplerPhase,
    vsync_period_ns: Option<i64>,
    latest_seen: i64,
    frames: Vec<FrameRecord>,
    raw_log: Vec<String>,
    polls: usize,
    missed_overlaps: usize,
}

impl Default for SamplerState {
    fn default() -> Self {
        Self::new()
    }
}

impl SamplerState {
    pub fn new() -> Self {
        Self {
            phase: SamplerPhase::NotStarted,
            vsync_period_ns: None,
            latest_seen: 0,
            frames: Vec::new(),
            raw_log: Vec::new(),
            polls: 0,
            missed_overlaps: 0,
        }
    }

    pub fn phase(&self) -> SamplerPhase {
        self.phase
    }

    pub fn vsync_period_ns(&self) -> Option<i64> {
        self.vsync_period_ns
    }

    pub fn frames(&self) -> &[FrameRecord] {
        &self.frames
    }

    pub fn raw_log(&self) -> &[String] {
        &self.raw_log
    }

    pub fn polls(&self) -> usize {
        self.polls
    }

    /// Polls that did not re-confirm any previously seen frame.
    pub fn missed_overlaps(&self) -> usize {
        self.missed_overlaps
    }

    /// Feed the raw output of one poll.
    pub fn ingest(&mut self, raw: &str) -> PollOutcome {
        if self.phase.is_terminal() {
            return PollOutcome::Ignored;
        }
        self.polls += 1;
        self.raw_log.push(raw.to_string());

        let dump = LatencyDump::parse(raw);
        if !dump.has_frame_lines {
            return self.on_vsync_only();
        }

        let first_poll = self.phase == SamplerPhase::NotStarted;
        if first_poll {
            let Some(vsync) = dump.vsync_period_ns.filter(|v| *v > 0) else {
                warn!("Latency output did not start with a vsync period; skipping poll");
                return PollOutcome::Malformed;
            };
            self.vsync_period_ns = Some(vsync);
            self.phase = SamplerPhase::Running;
            info!(vsync_period_ns = vsync, "Target is rendering, sampling started");
        }

        let latest_before = self.latest_seen;
        let mut overlap = false;
        let mut accepted = 0;
        for sample in &dump.samples {
            if sample.actual_present == PENDING_FENCE || sample.actual_present <= latest_before {
                overlap = true;
            }
            if self.accept(sample) {
                accepted += 1;
            }
        }

        if !first_poll && !overlap {
            self.missed_overlaps += 1;
            warn!(
                latest_seen = latest_before,
                "No overlap with previous poll, some frames were missed"
            );
        }
        debug!(accepted, total = self.frames.len(), "Poll processed");

        PollOutcome::Sampled { accepted, overlap }
    }

    /// End sampling at the orchestrator's request. A terminated run stays terminated.
    pub fn stop(&mut self) {
        if self.phase != SamplerPhase::Terminated {
            self.phase = SamplerPhase::Stopped;
        }
    }

    fn on_vsync_only(&mut self) -> PollOutcome {
        match self.phase {
            SamplerPhase::NotStarted => {
                debug!("No frame data yet, target is not rendering");
                PollOutcome::NotRendering
            }
            _ => {
                warn!(
                    frames = self.frames.len(),
                    "Frame data disappeared, the application appears to have terminated"
                );
                self.phase = SamplerPhase::Terminated;
                PollOutcome::Terminated
            }
        }
    }

    fn accept(&mut self, sample: &RawSample) -> bool {
        let present = sample.actual_present;
        if present == PENDING_FENCE || present <= self.latest_seen {
            return false;
        }
        self.frames.push(FrameRecord {
            present_ns: present,
            ready_ns: sample.frame_ready,
        });
        self.latest_seen = present;
        true
    }
}
