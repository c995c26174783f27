//! Certification verdict and run report
//!
//! A run passes when it was not cut short by the application terminating and,
//! if thresholds were supplied, its jank rate and load time are within them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::config::ReportConfig;
use crate::metric::{CertificationRequirements, Histogram, MetricData, MetricSummary};
use crate::sampler::RunOutcome;

const NS_PER_MS: i64 = 1_000_000;

/// One observation about a run, either a failure or a warning.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    /// The application stopped rendering before sampling was stopped
    Terminated,
    /// Sampling never saw a rendered frame
    NoFrameData,
    JankTooHigh { actual: f64, target: f64 },
    /// A load time limit is set but no loop start was reported
    LoadTimeUnknown,
    LoadTimeTooHigh { actual_ms: i64, target_ms: i64 },
    /// Performance was not checked
    RequirementsMissing,
}

impl Finding {
    pub fn is_failure(&self) -> bool {
        !matches!(self, Finding::RequirementsMissing)
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::Terminated => write!(f, "Application was terminated before the run ended"),
            Finding::NoFrameData => write!(f, "No frame data was collected"),
            Finding::JankTooHigh { actual, target } => {
                write!(f, "Jank rate is too high, actual: {actual}, target: {target}")
            }
            Finding::LoadTimeUnknown => write!(
                f,
                "Unable to determine load time. Expected START_LOOP event was not received"
            ),
            Finding::LoadTimeTooHigh {
                actual_ms,
                target_ms,
            } => write!(
                f,
                "Load time is too high, actual: {actual_ms} ms, target: {target_ms} ms"
            ),
            Finding::RequirementsMissing => write!(
                f,
                "Warning: performance metrics were ignored because certification requirements were not found"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub passed: bool,
    pub findings: Vec<Finding>,
}

impl Verdict {
    /// Evaluate a run. `summary` is `None` when no frame was sampled.
    pub fn evaluate(
        summary: Option<&MetricSummary>,
        requirements: Option<&CertificationRequirements>,
        terminated: bool,
    ) -> Self {
        let mut findings = Vec::new();
        if terminated {
            findings.push(Finding::Terminated);
        }

        match (summary, requirements) {
            (None, _) => findings.push(Finding::NoFrameData),
            (Some(_), None) => findings.push(Finding::RequirementsMissing),
            (Some(summary), Some(requirements)) => {
                if summary.jank_rate() > requirements.max_jank_rate {
                    findings.push(Finding::JankTooHigh {
                        actual: summary.jank_rate(),
                        target: requirements.max_jank_rate,
                    });
                }
                if requirements.checks_load_time() {
                    match summary.load_time_ms() {
                        None => findings.push(Finding::LoadTimeUnknown),
                        Some(load) if load > requirements.max_load_time_ms => {
                            findings.push(Finding::LoadTimeTooHigh {
                                actual_ms: load,
                                target_ms: requirements.max_load_time_ms,
                            })
                        }
                        Some(_) => {}
                    }
                }
            }
        }

        Self {
            passed: !findings.iter().any(Finding::is_failure),
            findings,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Performance tests [{}]",
            if self.passed { "PASSED" } else { "FAILED" }
        )?;
        for finding in &self.findings {
            writeln!(f, "{finding}")?;
        }
        Ok(())
    }
}

/// Serializable record of one certification run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub id: Uuid,
    pub device: String,
    pub layer: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub terminated: bool,
    pub vsync_period_ns: Option<i64>,
    pub frames: usize,
    pub polls: usize,
    pub missed_overlaps: usize,
    pub requirements: Option<CertificationRequirements>,
    pub metrics: MetricData,
    pub verdict: Verdict,
}

impl RunReport {
    pub fn new(
        device: &str,
        layer: &str,
        outcome: &RunOutcome,
        requirements: Option<&CertificationRequirements>,
    ) -> Self {
        let summary = outcome.segmentation.as_ref().map(|s| &s.summary);

        let mut metrics = MetricData::new();
        if let Some(summary) = summary {
            summary.add_to_metric_data(&mut metrics);
        }

        Self {
            id: Uuid::new_v4(),
            device: device.to_string(),
            layer: layer.to_string(),
            started_at: outcome.started_at,
            ended_at: outcome.ended_at,
            terminated: outcome.terminated(),
            vsync_period_ns: outcome.vsync_period_ns,
            frames: outcome.frames.len(),
            polls: outcome.polls,
            missed_overlaps: outcome.missed_overlaps,
            requirements: requirements.cloned(),
            metrics,
            verdict: Verdict::evaluate(summary, requirements, outcome.terminated()),
        }
    }

    pub fn duration_secs(&self) -> f64 {
        (self.ended_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// Histogram of frame times in milliseconds.
pub fn frame_time_histogram(frame_times_ns: &[i64], config: &ReportConfig) -> Histogram {
    let millis = frame_times_ns
        .iter()
        .map(|ns| (ns + NS_PER_MS / 2).div_euclid(NS_PER_MS));
    Histogram::new(millis, config.histogram_bucket_ms, None, config.histogram_max_ms)
}

#[cfg(test)]
mod tests {
    use super::{frame_time_histogram, Finding, RunReport, Verdict};
    use crate::config::ReportConfig;
    use crate::lifecycle::{EventKind, LifecycleEvent, LifecycleLog};
    use crate::metric::{CertificationRequirements, MetricSummary};
    use crate::sampler::segment::segment;
    use crate::sampler::state::{FrameRecord, SamplerPhase};
    use crate::sampler::RunOutcome;
    use chrono::{Duration, Utc};

    const MS: i64 = 1_000_000;

    fn frames(times_ms: &[i64]) -> Vec<FrameRecord> {
        times_ms
            .iter()
            .map(|&t| FrameRecord {
                present_ns: t * MS,
                ready_ns: t * MS - 1_000,
            })
            .collect()
    }

    /// Launch at 0, loop at 100 ms, one frame every 10 ms plus a 30 ms hitch.
    fn summary(requirements: Option<&CertificationRequirements>) -> MetricSummary {
        let mut times: Vec<i64> = (100..=200).step_by(10).collect();
        times.push(230);
        let events = LifecycleLog::new(vec![
            LifecycleEvent::new(EventKind::AppLaunch, 0),
            LifecycleEvent::new(EventKind::StartLoop, 100),
        ])
        .unwrap();
        segment(&frames(&times), &events, 10 * MS, requirements).summary
    }

    #[test]
    fn passes_within_thresholds() {
        let requirements = CertificationRequirements::new("loop", 10.0, 100.0, 200);
        let verdict = Verdict::evaluate(Some(&summary(Some(&requirements))), Some(&requirements), false);
        assert!(verdict.passed);
        assert!(verdict.findings.is_empty());
        assert_eq!(verdict.to_string(), "Performance tests [PASSED]\n");
    }

    #[test]
    fn fails_on_jank() {
        let requirements = CertificationRequirements::new("loop", 10.0, 1.0, -1);
        let summary = summary(Some(&requirements));
        let verdict = Verdict::evaluate(Some(&summary), Some(&requirements), false);

        assert!(!verdict.passed);
        assert!(matches!(verdict.findings[..], [Finding::JankTooHigh { .. }]));
        assert!(verdict.to_string().contains("Jank rate is too high"));
    }

    #[test]
    fn fails_on_load_time() {
        let requirements = CertificationRequirements::new("loop", 10.0, 100.0, 50);
        let verdict = Verdict::evaluate(Some(&summary(Some(&requirements))), Some(&requirements), false);
        assert_eq!(
            verdict.findings,
            vec![Finding::LoadTimeTooHigh {
                actual_ms: 100,
                target_ms: 50
            }]
        );
    }

    #[test]
    fn unknown_load_time_fails_only_when_checked() {
        let unchecked = CertificationRequirements::new("loop", 10.0, 100.0, -1);
        let checked = CertificationRequirements::new("loop", 10.0, 100.0, 1000);
        let events = LifecycleLog::new(vec![LifecycleEvent::new(EventKind::StartLoop, 0)]).unwrap();
        let summary = segment(&frames(&[0, 10, 20]), &events, 10 * MS, Some(&checked)).summary;

        assert!(Verdict::evaluate(Some(&summary), Some(&unchecked), false).passed);
        let verdict = Verdict::evaluate(Some(&summary), Some(&checked), false);
        assert_eq!(verdict.findings, vec![Finding::LoadTimeUnknown]);
        assert!(verdict
            .to_string()
            .contains("Expected START_LOOP event was not received"));
    }

    #[test]
    fn missing_requirements_only_warns() {
        let verdict = Verdict::evaluate(Some(&summary(None)), None, false);
        assert!(verdict.passed);
        assert_eq!(verdict.findings, vec![Finding::RequirementsMissing]);
    }

    #[test]
    fn termination_and_missing_data_fail() {
        let verdict = Verdict::evaluate(None, None, true);
        assert!(!verdict.passed);
        assert_eq!(verdict.findings, vec![Finding::Terminated, Finding::NoFrameData]);
        assert!(verdict.to_string().contains("Application was terminated"));
    }

    #[test]
    fn run_report_exports_metrics() {
        let requirements = CertificationRequirements::new("loop", 10.0, 100.0, -1);
        let times: Vec<i64> = (0..=100).step_by(10).collect();
        let events = LifecycleLog::new(vec![LifecycleEvent::new(EventKind::StartLoop, 0)]).unwrap();
        let frames = frames(&times);
        let started_at = Utc::now();
        let outcome = RunOutcome {
            phase: SamplerPhase::Stopped,
            started_at,
            ended_at: started_at + Duration::seconds(3),
            vsync_period_ns: Some(10 * MS),
            segmentation: Some(segment(&frames, &events, 10 * MS, Some(&requirements))),
            frames,
            raw_log: vec![],
            polls: 4,
            missed_overlaps: 0,
        };

        let report = RunReport::new("emulator-5554", "SurfaceView#0", &outcome, Some(&requirements));
        assert!(report.verdict.passed);
        assert_eq!(report.frames, 11);
        assert_eq!(report.duration_secs(), 3.0);
        assert_eq!(report.metrics.get_int("loop_count"), Ok(1));
        assert_eq!(report.metrics.get_int("run_0.present_frame_count"), Ok(10));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["device"], "emulator-5554");
        assert_eq!(json["verdict"]["passed"], true);
    }

    #[test]
    fn histogram_buckets_frame_times_in_ms() {
        let config = ReportConfig {
            histogram_bucket_ms: 2,
            histogram_max_ms: Some(40),
            ..ReportConfig::default()
        };
        let times = [16_600_000, 16_700_000, 33_400_000, 250_000_000];
        let histogram = frame_time_histogram(&times, &config);

        let counts: Vec<(i64, usize)> = histogram.counts().iter().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(counts, vec![(18, 2), (34, 1), (40, 1)]);
    }
}
