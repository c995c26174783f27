//! Per-loop frame time statistics for one timing channel

use std::collections::BinaryHeap;
use std::fmt;

use super::data::{MetricData, MetricParseError};
use super::summary::TimeType;

const NOT_PROCESSED: &str = "process_frame_times must be called first";

/// Frame time statistics for a single loop of one channel.
///
/// Deltas are accumulated with [`LoopSummary::add_frame_time`] and frozen with
/// [`LoopSummary::process_frame_times`], which must run exactly once before the
/// average or any percentile is read.
///
/// Percentiles are "largest frame time" percentiles: p99 is the value with
/// roughly 1% of samples above it. They are extracted by popping the maximum
/// `floor(n * 0.10)` times; with fewer than 100 samples several ranks collapse
/// to 0 and the percentiles equal the maximum frame time.
#[derive(Debug, Clone)]
pub struct LoopSummary {
    processed: bool,
    count: i64,
    total_time_ns: i64,
    min_frame_time: i64,
    max_frame_time: i64,
    avg_frame_time: f64,
    percentile90: i64,
    percentile95: i64,
    percentile99: i64,
    frame_times: BinaryHeap<i64>,
}

impl Default for LoopSummary {
    fn default() -> Self {
        Self {
            processed: false,
            count: 0,
            total_time_ns: 0,
            min_frame_time: i64::MAX,
            max_frame_time: 0,
            avg_frame_time: 0.0,
            percentile90: -1,
            percentile95: -1,
            percentile99: -1,
            frame_times: BinaryHeap::new(),
        }
    }
}

impl LoopSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    /// Sum of all frame times in nanoseconds.
    pub fn duration(&self) -> i64 {
        self.total_time_ns
    }

    pub fn min_frame_time(&self) -> i64 {
        self.min_frame_time
    }

    pub fn max_frame_time(&self) -> i64 {
        self.max_frame_time
    }

    pub fn avg_frame_time(&self) -> f64 {
        assert!(self.processed, "{NOT_PROCESSED}");
        self.avg_frame_time
    }

    pub fn min_fps(&self) -> f64 {
        1.0e9 / self.max_frame_time as f64
    }

    pub fn max_fps(&self) -> f64 {
        1.0e9 / self.min_frame_time as f64
    }

    pub fn avg_fps(&self) -> f64 {
        1.0e9 / self.avg_frame_time()
    }

    pub fn percentile_90(&self) -> i64 {
        assert!(self.processed, "{NOT_PROCESSED}");
        self.percentile90
    }

    pub fn percentile_95(&self) -> i64 {
        assert!(self.processed, "{NOT_PROCESSED}");
        self.percentile95
    }

    pub fn percentile_99(&self) -> i64 {
        assert!(self.processed, "{NOT_PROCESSED}");
        self.percentile99
    }

    pub fn add_frame_time(&mut self, frame_time_ns: i64) {
        self.min_frame_time = self.min_frame_time.min(frame_time_ns);
        self.max_frame_time = self.max_frame_time.max(frame_time_ns);
        self.total_time_ns += frame_time_ns;
        self.frame_times.push(frame_time_ns);
        self.count += 1;
    }

    /// Freeze the loop and compute the average and percentiles.
    ///
    /// # Panics
    ///
    /// Panics when called a second time.
    pub fn process_frame_times(&mut self) {
        assert!(!self.processed, "frame times were already processed");
        self.processed = true;
        if self.count == 0 {
            return;
        }
        self.avg_frame_time = self.total_time_ns as f64 / self.count as f64;
        self.calc_percentiles();
    }

    fn calc_percentiles(&mut self) {
        let size = self.frame_times.len() as f64;
        let one_percent = (size * 0.01) as usize;
        let five_percent = (size * 0.05) as usize;
        let ten_percent = (size * 0.10) as usize;

        for i in 0..=ten_percent {
            let Some(top) = self.frame_times.pop() else {
                break;
            };
            if i == one_percent {
                self.percentile99 = top;
            }
            if i == five_percent {
                self.percentile95 = top;
            }
            if i == ten_percent {
                self.percentile90 = top;
            }
        }
        self.frame_times.clear();
    }

    pub(crate) fn add_to_metric_data(&self, data: &mut MetricData, index: usize, kind: TimeType) {
        data.put_int(metric_key(kind, index, "frame_count"), self.count());
        data.put_int(metric_key(kind, index, "duration"), self.duration());
        data.put_int(metric_key(kind, index, "min_frametime"), self.min_frame_time());
        data.put_int(metric_key(kind, index, "max_frametime"), self.max_frame_time());
        data.put_double(metric_key(kind, index, "frametime"), self.avg_frame_time());
        data.put_int(metric_key(kind, index, "90th_percentile"), self.percentile_90());
        data.put_int(metric_key(kind, index, "95th_percentile"), self.percentile_95());
        data.put_int(metric_key(kind, index, "99th_percentile"), self.percentile_99());
    }

    pub(crate) fn parse_run_metrics(
        data: &MetricData,
        kind: TimeType,
        index: usize,
    ) -> Result<Self, MetricParseError> {
        Ok(Self {
            processed: true,
            count: data.get_int(&metric_key(kind, index, "frame_count"))?,
            total_time_ns: data.get_int(&metric_key(kind, index, "duration"))?,
            min_frame_time: data.get_int(&metric_key(kind, index, "min_frametime"))?,
            max_frame_time: data.get_int(&metric_key(kind, index, "max_frametime"))?,
            avg_frame_time: data.get_double(&metric_key(kind, index, "frametime"))?,
            percentile90: data.get_int(&metric_key(kind, index, "90th_percentile"))?,
            percentile95: data.get_int(&metric_key(kind, index, "95th_percentile"))?,
            percentile99: data.get_int(&metric_key(kind, index, "99th_percentile"))?,
            frame_times: BinaryHeap::new(),
        })
    }
}

pub(crate) fn metric_key(kind: TimeType, index: usize, label: &str) -> String {
    format!("run_{index}.{}_{label}", kind.as_str())
}

// The pending heap is working storage only and is left out of equality.
impl PartialEq for LoopSummary {
    fn eq(&self, other: &Self) -> bool {
        self.processed == other.processed
            && self.count == other.count
            && self.total_time_ns == other.total_time_ns
            && self.min_frame_time == other.min_frame_time
            && self.max_frame_time == other.max_frame_time
            && self.avg_frame_time.total_cmp(&other.avg_frame_time).is_eq()
            && self.percentile90 == other.percentile90
            && self.percentile95 == other.percentile95
            && self.percentile99 == other.percentile99
    }
}

fn ns_to_ms(value: f64) -> f64 {
    value / 1e6
}

impl fmt::Display for LoopSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "duration: {:.3} ms", ns_to_ms(self.duration() as f64))?;
        writeln!(
            f,
            "avg Frame Time: {:7.3} ms\t\tavg FPS = {:.3} fps",
            ns_to_ms(self.avg_frame_time()),
            self.avg_fps()
        )?;
        writeln!(
            f,
            "max Frame Time: {:7.3} ms\t\tmin FPS = {:.3} fps",
            ns_to_ms(self.max_frame_time() as f64),
            self.min_fps()
        )?;
        writeln!(
            f,
            "min Frame Time: {:7.3} ms\t\tmax FPS = {:.3} fps",
            ns_to_ms(self.min_frame_time() as f64),
            self.max_fps()
        )?;
        writeln!(
            f,
            "90th Percentile Frame Time: {:7.3} ms",
            ns_to_ms(self.percentile_90() as f64)
        )?;
        writeln!(
            f,
            "95th Percentile Frame Time: {:7.3} ms",
            ns_to_ms(self.percentile_95() as f64)
        )?;
        writeln!(
            f,
            "99th Percentile Frame Time: {:7.3} ms",
            ns_to_ms(self.percentile_99() as f64)
        )
    }
}
