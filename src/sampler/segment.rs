//! Loop segmentation
//!
//! Splits the accepted frame timeline at every loop start reported by the
//! application and turns each slice into per-channel frame time deltas.

use std::fmt::Write as _;
use tracing::{info, warn};

use super::state::{FrameRecord, PENDING_FENCE};
use crate::lifecycle::LifecycleLog;
use crate::metric::{Builder, CertificationRequirements, MetricSummary, TimeType};

/// Result of segmenting one run.
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub summary: MetricSummary,
    /// Present-channel frame times of every loop, in order
    pub present_frame_times: Vec<i64>,
    /// Human-readable per-loop trace
    pub trace: String,
}

/// Segment `frames` by the loop starts in `events` and summarize every loop.
///
/// Loop `i` covers present times in `[start_i, start_{i+1})`; the last loop
/// runs up to and including the last frame. The first frame of every loop is
/// only a baseline, so deltas never span two loops.
pub fn segment(
    frames: &[FrameRecord],
    events: &LifecycleLog,
    vsync_period_ns: i64,
    requirements: Option<&CertificationRequirements>,
) -> Segmentation {
    let mut builder = Builder::new(requirements.cloned(), vsync_period_ns);
    let mut trace = String::new();
    let mut present_frame_times = Vec::new();

    let _ = writeln!(trace, "VSync Period: {vsync_period_ns}\n");

    let starts: Vec<i64> = events.loop_starts().map(|e| e.timestamp_ns()).collect();
    if starts.is_empty() {
        warn!("No loop start event received; no loops will be reported");
        let _ = writeln!(trace, "No loop start events received.");
    }

    if let (Some(launch), Some(first)) = (events.app_launch(), events.loop_starts().next()) {
        let load_time_ms = first.timestamp_ms - launch.timestamp_ms;
        info!(load_time_ms, "Load time measured");
        builder.set_load_time_ms(load_time_ms);
    }

    for (index, &start) in starts.iter().enumerate() {
        let lo = frames.partition_point(|f| f.present_ns < start);
        let hi = match starts.get(index + 1) {
            Some(&next) => frames.partition_point(|f| f.present_ns < next),
            None => frames.len(),
        };
        let slice = &frames[lo..hi.max(lo)];

        builder.begin_loop();
        process_slice(index, start, slice, &mut builder, &mut trace, &mut present_frame_times);
        builder.end_loop();
    }

    Segmentation {
        summary: builder.build(),
        present_frame_times,
        trace,
    }
}

fn process_slice(
    index: usize,
    start: i64,
    slice: &[FrameRecord],
    builder: &mut Builder,
    trace: &mut String,
    present_frame_times: &mut Vec<i64>,
) {
    let _ = writeln!(trace, "Started loop {index} at: {start} ns");

    if slice.len() < 2 {
        warn!(loop_index = index, "No samples in loop, assuming spurious lifecycle event");
        let _ = writeln!(trace, "No samples in period, assuming spurious lifecycle event.\n");
        return;
    }

    let _ = writeln!(trace, "Frame Time\t\tFrames Per Second");

    let mut min_fps = f64::MAX;
    let mut max_fps = 0.0_f64;
    let mut total_ns = 0_i64;
    for pair in slice.windows(2) {
        let (prev, cur) = (pair[0], pair[1]);

        let present_delta = cur.present_ns - prev.present_ns;
        builder.add_frame_time(TimeType::Present, present_delta);
        present_frame_times.push(present_delta);

        if prev.ready_ns != PENDING_FENCE && cur.ready_ns != PENDING_FENCE {
            builder.add_frame_time(TimeType::Ready, cur.ready_ns - prev.ready_ns);
        }

        let fps = 1.0e9 / present_delta as f64;
        min_fps = min_fps.min(fps);
        max_fps = max_fps.max(fps);
        total_ns += present_delta;
        let _ = writeln!(trace, "{present_delta} ns\t\t{fps} fps");
    }

    let frames = slice.len() - 1;
    let avg_fps = frames as f64 * 1.0e9 / total_ns as f64;
    let _ = writeln!(trace, "\nSTATS");
    let _ = writeln!(trace, "min FPS = {min_fps}");
    let _ = writeln!(trace, "max FPS = {max_fps}");
    let _ = writeln!(trace, "avg FPS = {avg_fps}\n");
}
