//! Run-level frame time summary
//!
//! A [`MetricSummary`] holds one [`LoopSummary`] per loop and timing channel,
//! plus the load time and the aggregate jank rate. It is assembled once by a
//! [`Builder`] fed with loop boundaries and frame time deltas, and can be
//! exported to and parsed back from a flat [`MetricData`] map.

use std::fmt;

use super::data::{MetricData, MetricParseError};
use super::loop_summary::LoopSummary;
use super::requirements::CertificationRequirements;

/// Sentinel written for an unknown load time.
pub const UNKNOWN_LOAD_TIME: i64 = -1;

/// Timing channel a frame time delta was measured on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeType {
    /// Difference between consecutive actual present times
    Present,
    /// Difference between consecutive frame ready times
    Ready,
}

impl TimeType {
    pub const ALL: [TimeType; 2] = [TimeType::Present, TimeType::Ready];

    pub fn as_str(self) -> &'static str {
        match self {
            TimeType::Present => "present",
            TimeType::Ready => "ready",
        }
    }

    fn index(self) -> usize {
        match self {
            TimeType::Present => 0,
            TimeType::Ready => 1,
        }
    }
}

impl fmt::Display for TimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeType::Present => write!(f, "PRESENT"),
            TimeType::Ready => write!(f, "READY"),
        }
    }
}

/// Summary of frame time metrics for a whole run.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSummary {
    loop_count: usize,
    jank_rate: f64,
    load_time_ms: Option<i64>,
    summaries: [Vec<LoopSummary>; 2],
}

impl MetricSummary {
    pub fn loop_count(&self) -> usize {
        self.loop_count
    }

    /// Jank events per second of content played.
    pub fn jank_rate(&self) -> f64 {
        self.jank_rate
    }

    /// Time from application launch to the first loop, when both were seen.
    pub fn load_time_ms(&self) -> Option<i64> {
        self.load_time_ms
    }

    pub fn loops(&self, kind: TimeType) -> &[LoopSummary] {
        &self.summaries[kind.index()]
    }

    pub fn add_to_metric_data(&self, data: &mut MetricData) {
        data.put_int("loop_count", self.loop_count as i64);
        data.put_double("jank_rate", self.jank_rate);
        data.put_int("load_time", self.load_time_ms.unwrap_or(UNKNOWN_LOAD_TIME));

        for index in 0..self.loop_count {
            for kind in TimeType::ALL {
                self.summaries[kind.index()][index].add_to_metric_data(data, index, kind);
            }
        }
    }

    /// Rebuild a summary from a metric map. Every expected key must be present.
    pub fn parse_run_metrics(data: &MetricData) -> Result<Self, MetricParseError> {
        let loop_count = data.get_int("loop_count")?;
        let loop_count = usize::try_from(loop_count).map_err(|_| MetricParseError::WrongType {
            key: "loop_count".to_string(),
            expected: "non-negative int",
        })?;
        let jank_rate = data.get_double("jank_rate")?;
        let load_time = data.get_int("load_time")?;

        let mut summaries: [Vec<LoopSummary>; 2] = Default::default();
        for kind in TimeType::ALL {
            for index in 0..loop_count {
                summaries[kind.index()].push(LoopSummary::parse_run_metrics(data, kind, index)?);
            }
        }

        Ok(Self {
            loop_count,
            jank_rate,
            load_time_ms: (load_time != UNKNOWN_LOAD_TIME).then_some(load_time),
            summaries,
        })
    }
}

impl fmt::Display for MetricSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Summary")?;
        writeln!(f, "-------")?;
        writeln!(f, "'Jank' rate: {:.3}", self.jank_rate)?;
        match self.load_time_ms {
            Some(ms) => writeln!(f, "Load time: {ms} ms")?,
            None => writeln!(f, "Load time: unknown")?,
        }
        writeln!(f)?;

        writeln!(f, "Details")?;
        writeln!(f, "-------")?;
        for index in 0..self.loop_count {
            if self.loops(TimeType::Present)[index].count() == 0 {
                continue;
            }
            writeln!(f, "Loop {index}")?;
            for kind in TimeType::ALL {
                writeln!(f, "{kind} Time Statistics")?;
                writeln!(f, "{}", self.loops(kind)[index])?;
            }
        }
        Ok(())
    }
}

/// Incremental builder for [`MetricSummary`], also responsible for jank scoring.
#[derive(Debug)]
pub struct Builder {
    requirements: Option<CertificationRequirements>,
    vsync_period_ns: i64,
    jank_score: f64,
    total_time_ns: i64,
    loop_count: usize,
    load_time_ms: Option<i64>,
    summaries: [Vec<LoopSummary>; 2],
}

impl Builder {
    pub fn new(requirements: Option<CertificationRequirements>, vsync_period_ns: i64) -> Self {
        Self {
            requirements,
            vsync_period_ns,
            jank_score: 0.0,
            total_time_ns: 0,
            loop_count: 0,
            load_time_ms: None,
            summaries: Default::default(),
        }
    }

    pub fn set_load_time_ms(&mut self, load_time_ms: i64) {
        self.load_time_ms = Some(load_time_ms);
    }

    pub fn begin_loop(&mut self) {
        self.loop_count += 1;
        for list in &mut self.summaries {
            list.push(LoopSummary::new());
        }
    }

    pub fn add_frame_time(&mut self, kind: TimeType, frame_time_ns: i64) {
        if kind == TimeType::Present {
            self.score_jank(frame_time_ns);
        }
        self.latest_summary(kind).add_frame_time(frame_time_ns);
    }

    pub fn end_loop(&mut self) {
        for kind in TimeType::ALL {
            self.latest_summary(kind).process_frame_times();
        }
    }

    pub fn build(self) -> MetricSummary {
        let jank_rate = if self.total_time_ns > 0 {
            self.jank_score * 1e9 / self.total_time_ns as f64
        } else {
            0.0
        };
        MetricSummary {
            loop_count: self.loop_count,
            jank_rate,
            load_time_ms: self.load_time_ms,
            summaries: self.summaries,
        }
    }

    fn score_jank(&mut self, frame_time_ns: i64) {
        self.total_time_ns += frame_time_ns;
        let Some(requirements) = &self.requirements else {
            return;
        };
        if self.vsync_period_ns <= 0 {
            return;
        }

        let target = requirements.target_frame_time_ns();
        let vsync = self.vsync_period_ns as f64;
        let quantized = (frame_time_ns as f64 / vsync).round() * vsync;
        if quantized > target {
            self.jank_score += (quantized - target) / target;
        }
    }

    fn latest_summary(&mut self, kind: TimeType) -> &mut LoopSummary {
        assert!(self.loop_count > 0, "first loop has not been started");
        self.summaries[kind.index()]
            .last_mut()
            .expect("a summary exists for every started loop")
    }
}
