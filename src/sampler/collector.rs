//! Periodic frame sampler
//!
//! One tokio task per run polls the device on a fixed-delay or fixed-rate
//! schedule. The task and the finalize path share the run state through one
//! async mutex, so a tick never interleaves with another tick or with
//! finalization.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::parser::latency_command;
use super::segment::{segment, Segmentation};
use super::state::{FrameRecord, PollOutcome, SamplerPhase, SamplerState};
use crate::device::DeviceCommand;
use crate::lifecycle::LifecycleLog;
use crate::metric::CertificationRequirements;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Wait a full interval after each poll completes
    FixedDelay,
    /// Poll at fixed instants, catching up on late ticks
    FixedRate,
}

#[derive(Debug, Clone)]
pub struct SamplerOptions {
    pub layer_name: String,
    pub interval: Duration,
    pub schedule: Schedule,
    /// Poll once more after the periodic task is cancelled
    pub final_drain: bool,
}

impl SamplerOptions {
    pub fn validate(&self) -> Result<()> {
        if self.layer_name.trim().is_empty() {
            anyhow::bail!("layer name must not be empty");
        }
        let interval_ms = self.interval.as_millis();
        if !(10..=60_000).contains(&interval_ms) {
            anyhow::bail!("poll interval must be between 10 and 60000 ms");
        }
        Ok(())
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub phase: SamplerPhase,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub vsync_period_ns: Option<i64>,
    pub frames: Vec<FrameRecord>,
    pub raw_log: Vec<String>,
    pub polls: usize,
    pub missed_overlaps: usize,
    /// `None` when no frame was ever sampled
    pub segmentation: Option<Segmentation>,
}

impl RunOutcome {
    pub fn terminated(&self) -> bool {
        self.phase == SamplerPhase::Terminated
    }
}

/// Lifecycle hooks the orchestrator drives for every run.
pub trait RunCollector {
    /// Start sampling.
    fn on_run_start(&mut self) -> Result<()>;

    /// Whether sampling ended on its own, e.g. because the application terminated.
    fn finished(&self) -> bool;

    /// Stop sampling, drain once more and summarize the run against `events`.
    async fn on_run_end(&mut self, events: &LifecycleLog) -> Result<RunOutcome>;
}

struct PollTask {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Samples frame timestamps of one layer on one device.
pub struct FrameSampler<D: DeviceCommand + 'static> {
    device: Arc<D>,
    options: SamplerOptions,
    requirements: Option<CertificationRequirements>,
    state: Arc<Mutex<SamplerState>>,
    task: Option<PollTask>,
    started_at: Option<DateTime<Utc>>,
}

impl<D: DeviceCommand + 'static> FrameSampler<D> {
    pub fn new(
        device: Arc<D>,
        options: SamplerOptions,
        requirements: Option<CertificationRequirements>,
    ) -> Self {
        Self {
            device,
            options,
            requirements,
            state: Arc::new(Mutex::new(SamplerState::new())),
            task: None,
            started_at: None,
        }
    }

    pub async fn phase(&self) -> SamplerPhase {
        self.state.lock().await.phase()
    }
}

impl<D: DeviceCommand + 'static> RunCollector for FrameSampler<D> {
    fn on_run_start(&mut self) -> Result<()> {
        if self.task.is_some() {
            anyhow::bail!("sampler is already running");
        }
        self.options.validate()?;

        self.state = Arc::new(Mutex::new(SamplerState::new()));
        self.started_at = Some(Utc::now());

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(poll_loop(
            Arc::clone(&self.device),
            Arc::clone(&self.state),
            latency_command(&self.options.layer_name),
            self.options.interval,
            self.options.schedule,
            stop_rx,
        ));
        self.task = Some(PollTask { stop_tx, handle });

        info!(
            device = self.device.name(),
            layer = %self.options.layer_name,
            interval_ms = self.options.interval.as_millis() as u64,
            "Frame sampling started"
        );
        Ok(())
    }

    fn finished(&self) -> bool {
        self.task
            .as_ref()
            .map(|task| task.handle.is_finished())
            .unwrap_or(true)
    }

    async fn on_run_end(&mut self, events: &LifecycleLog) -> Result<RunOutcome> {
        if let Some(task) = self.task.take() {
            let _ = task.stop_tx.send(true);
            if let Err(err) = task.handle.await {
                warn!("Polling task ended abnormally: {err}");
            }
        }

        let mut state = self.state.lock().await;
        if self.options.final_drain && state.phase() == SamplerPhase::Running {
            let command = latency_command(&self.options.layer_name);
            if let Some(PollOutcome::Sampled { accepted, overlap }) =
                poll_once(&self.device, &mut state, &command).await
            {
                debug!(accepted, overlap, "Final drain");
            }
        }
        state.stop();

        let segmentation = match state.vsync_period_ns() {
            Some(vsync) => Some(segment(
                state.frames(),
                events,
                vsync,
                self.requirements.as_ref(),
            )),
            None => {
                warn!("No frame data was collected during the run");
                None
            }
        };

        info!(
            phase = %state.phase(),
            frames = state.frames().len(),
            polls = state.polls(),
            missed_overlaps = state.missed_overlaps(),
            "Frame sampling finished"
        );

        Ok(RunOutcome {
            phase: state.phase(),
            started_at: self.started_at.take().unwrap_or_else(Utc::now),
            ended_at: Utc::now(),
            vsync_period_ns: state.vsync_period_ns(),
            frames: state.frames().to_vec(),
            raw_log: state.raw_log().to_vec(),
            polls: state.polls(),
            missed_overlaps: state.missed_overlaps(),
            segmentation,
        })
    }
}

async fn poll_loop<D: DeviceCommand + 'static>(
    device: Arc<D>,
    state: Arc<Mutex<SamplerState>>,
    command: String,
    period: Duration,
    schedule: Schedule,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

    loop {
        let phase = {
            let mut guard = state.lock().await;
            poll_once(&device, &mut guard, &command).await;
            guard.phase()
        };
        if phase.is_terminal() {
            debug!(%phase, "Polling stopped");
            break;
        }

        tokio::select! {
            _ = next_tick(schedule, &mut ticker, period) => {}
            _ = stop_rx.changed() => break,
        }
    }
}

async fn next_tick(schedule: Schedule, ticker: &mut Interval, period: Duration) {
    match schedule {
        Schedule::FixedRate => {
            ticker.tick().await;
        }
        Schedule::FixedDelay => time::sleep(period).await,
    }
}

/// Run the latency command once and feed its output to `state`.
///
/// Device failures are logged and leave the state untouched.
async fn poll_once<D: DeviceCommand + 'static>(
    device: &Arc<D>,
    state: &mut SamplerState,
    command: &str,
) -> Option<PollOutcome> {
    if state.phase().is_terminal() {
        return None;
    }

    let device = Arc::clone(device);
    let command = command.to_string();
    let output = tokio::task::spawn_blocking(move || device.execute_shell(&command)).await;

    match output {
        Ok(Ok(raw)) => Some(state.ingest(&raw)),
        Ok(Err(err)) => {
            warn!("Device command failed, skipping poll: {err}");
            None
        }
        Err(err) => {
            warn!("Device command task failed, skipping poll: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FrameSampler, RunCollector, SamplerOptions, Schedule};
    use crate::device::{DeviceCommand, DeviceError};
    use crate::lifecycle::{EventKind, LifecycleEvent, LifecycleLog};
    use crate::metric::TimeType;
    use crate::sampler::state::SamplerPhase;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const MS: i64 = 1_000_000;
    const VSYNC: &str = "16666666\n";

    /// Replays scripted outputs; the last entry repeats forever.
    struct ScriptedDevice {
        script: Mutex<VecDeque<Result<String, String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedDevice {
        fn new(script: Vec<Result<String, String>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl DeviceCommand for ScriptedDevice {
        fn name(&self) -> &str {
            "scripted"
        }

        fn execute_shell(&self, command: &str) -> Result<String, DeviceError> {
            assert!(command.starts_with("dumpsys SurfaceFlinger --latency"));
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            let next = if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            };
            next.map_err(DeviceError::Unavailable)
        }

        fn pull_file(&self, _remote: &str, _local: &Path) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    fn frames(from_ms: i64, to_ms: i64) -> Result<String, String> {
        let mut out = VSYNC.to_string();
        for t in (from_ms..=to_ms).step_by(10) {
            out.push_str(&format!("0\t{}\t{}\n", t * MS, t * MS - 1_000));
        }
        Ok(out)
    }

    fn options(schedule: Schedule) -> SamplerOptions {
        SamplerOptions {
            layer_name: "SurfaceView - com.example/.Main#0".to_string(),
            interval: Duration::from_millis(10),
            schedule,
            final_drain: true,
        }
    }

    async fn wait_for_calls(device: &ScriptedDevice, calls: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while device.calls() < calls {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("device was polled");
    }

    fn one_loop_events() -> LifecycleLog {
        LifecycleLog::new(vec![
            LifecycleEvent::new(EventKind::AppLaunch, 0),
            LifecycleEvent::new(EventKind::StartLoop, 100),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn samples_deduplicates_and_summarizes() {
        let device = ScriptedDevice::new(vec![
            Ok(VSYNC.to_string()),
            frames(100, 200),
            Err("device offline".to_string()),
            frames(150, 300),
            frames(250, 400),
        ]);
        let mut sampler = FrameSampler::new(Arc::clone(&device), options(Schedule::FixedDelay), None);

        sampler.on_run_start().unwrap();
        assert!(sampler.on_run_start().is_err());
        wait_for_calls(&device, 6).await;
        assert_eq!(sampler.phase().await, SamplerPhase::Running);

        let outcome = sampler.on_run_end(&one_loop_events()).await.unwrap();
        assert_eq!(outcome.phase, SamplerPhase::Stopped);
        assert!(!outcome.terminated());
        assert_eq!(outcome.vsync_period_ns, Some(16_666_666));
        assert_eq!(outcome.missed_overlaps, 0);

        let presents: Vec<i64> = outcome.frames.iter().map(|f| f.present_ns / MS).collect();
        let expected: Vec<i64> = (100..=400).step_by(10).collect();
        assert_eq!(presents, expected);

        let segmentation = outcome.segmentation.expect("frames were sampled");
        let summary = &segmentation.summary;
        assert_eq!(summary.loop_count(), 1);
        assert_eq!(summary.load_time_ms(), Some(100));
        assert_eq!(summary.loops(TimeType::Present)[0].count(), 30);
    }

    /// Polls once on start, then waits a full minute before the next tick.
    async fn run_one_tick(final_drain: bool) -> (Arc<ScriptedDevice>, super::RunOutcome, usize) {
        let device = ScriptedDevice::new(vec![frames(0, 200), frames(150, 500)]);
        let opts = SamplerOptions {
            interval: Duration::from_secs(60),
            final_drain,
            ..options(Schedule::FixedDelay)
        };
        let mut sampler = FrameSampler::new(Arc::clone(&device), opts, None);

        sampler.on_run_start().unwrap();
        wait_for_calls(&device, 1).await;
        let calls_before_end = device.calls();
        let outcome = sampler.on_run_end(&one_loop_events()).await.unwrap();
        (device, outcome, calls_before_end)
    }

    #[tokio::test]
    async fn final_drain_collects_frames_after_last_tick() {
        let (device, outcome, calls_before_end) = run_one_tick(true).await;

        assert_eq!(calls_before_end, 1);
        assert_eq!(device.calls(), 2);
        assert_eq!(outcome.phase, SamplerPhase::Stopped);
        assert_eq!(outcome.polls, 2);
        assert_eq!(outcome.missed_overlaps, 0);
        assert_eq!(outcome.frames.last().map(|f| f.present_ns), Some(500 * MS));
        assert_eq!(outcome.frames.len(), 51);

        let summary = outcome.segmentation.expect("frames were sampled").summary;
        assert_eq!(summary.loops(TimeType::Present)[0].count(), 40);
    }

    #[tokio::test]
    async fn disabled_final_drain_makes_no_extra_call() {
        let (device, outcome, calls_before_end) = run_one_tick(false).await;

        assert_eq!(calls_before_end, 1);
        assert_eq!(device.calls(), 1);
        assert_eq!(outcome.polls, 1);
        assert_eq!(outcome.frames.last().map(|f| f.present_ns), Some(200 * MS));
    }

    #[tokio::test]
    async fn termination_stops_polling() {
        let device = ScriptedDevice::new(vec![frames(0, 100), Ok(VSYNC.to_string())]);
        let mut sampler = FrameSampler::new(Arc::clone(&device), options(Schedule::FixedRate), None);

        sampler.on_run_start().unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !sampler.finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("polling task exits on termination");

        let calls = device.calls();
        let outcome = sampler.on_run_end(&one_loop_events()).await.unwrap();
        assert_eq!(device.calls(), calls, "no drain after termination");
        assert!(outcome.terminated());
        assert_eq!(outcome.frames.len(), 11);
    }

    #[tokio::test]
    async fn no_polls_after_run_end_returns() {
        let device = ScriptedDevice::new(vec![frames(0, 50)]);
        let mut sampler = FrameSampler::new(Arc::clone(&device), options(Schedule::FixedRate), None);

        sampler.on_run_start().unwrap();
        wait_for_calls(&device, 2).await;
        sampler.on_run_end(&LifecycleLog::default()).await.unwrap();

        let calls = device.calls();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(device.calls(), calls);
        assert!(sampler.finished());
    }

    #[tokio::test]
    async fn never_rendering_run_has_no_segmentation() {
        let device = ScriptedDevice::new(vec![Ok(VSYNC.to_string())]);
        let mut sampler = FrameSampler::new(Arc::clone(&device), options(Schedule::FixedDelay), None);

        sampler.on_run_start().unwrap();
        wait_for_calls(&device, 2).await;
        let outcome = sampler.on_run_end(&one_loop_events()).await.unwrap();

        assert_eq!(outcome.phase, SamplerPhase::Stopped);
        assert!(outcome.segmentation.is_none());
        assert!(outcome.frames.is_empty());
    }

    #[test]
    fn options_are_validated() {
        let mut opts = options(Schedule::FixedDelay);
        assert!(opts.validate().is_ok());
        opts.interval = Duration::from_millis(1);
        assert!(opts.validate().is_err());
        opts.interval = Duration::from_secs(1);
        opts.layer_name = "  ".to_string();
        assert!(opts.validate().is_err());
    }
}
