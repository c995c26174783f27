//! Local storage for certification runs
//!
//! Stores data in:
//! - Linux: ~/.local/share/frame-cert/runs/<id>/
//! - macOS: ~/Library/Application Support/frame-cert/runs/<id>/
//! - Windows: %APPDATA%/frame-cert/runs/<id>/
//!
//! Each run directory holds `run.json`, `metrics.json`, `timeline.csv`,
//! `trace.txt` and `raw.log`.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::metric::MetricData;
use crate::report::RunReport;
use crate::sampler::RunOutcome;

pub const RUN_FILE: &str = "run.json";
pub const METRICS_FILE: &str = "metrics.json";
pub const TIMELINE_FILE: &str = "timeline.csv";
pub const TRACE_FILE: &str = "trace.txt";
pub const RAW_LOG_FILE: &str = "raw.log";

/// Where run outputs are written.
pub struct RunStorage {
    root: PathBuf,
    /// Write straight into `root` instead of a per-run subdirectory
    flat: bool,
}

impl RunStorage {
    /// Storage under the platform data directory
    pub fn new() -> Result<Self> {
        let proj_dirs = ProjectDirs::from("com", "framecert", "frame-cert")
            .context("Could not determine project directories")?;
        let root = proj_dirs.data_dir().join("runs");
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create data directory: {}", root.display()))?;

        Ok(Self { root, flat: false })
    }

    /// Per-run subdirectories under `root`
    pub fn under(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            flat: false,
        }
    }

    /// All outputs directly in `dir`
    pub fn exact(dir: impl Into<PathBuf>) -> Self {
        Self {
            root: dir.into(),
            flat: true,
        }
    }

    pub fn run_dir(&self, report: &RunReport) -> PathBuf {
        if self.flat {
            self.root.clone()
        } else {
            self.root.join(report.id.to_string())
        }
    }

    /// Write every output of a run and return its directory.
    pub fn save_run(&self, report: &RunReport, outcome: &RunOutcome) -> Result<PathBuf> {
        let dir = self.run_dir(report);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create run directory: {}", dir.display()))?;

        let json = serde_json::to_string_pretty(report).context("Failed to serialize run report")?;
        write_file(&dir.join(RUN_FILE), json.as_bytes())?;

        let json =
            serde_json::to_string_pretty(&report.metrics).context("Failed to serialize metrics")?;
        write_file(&dir.join(METRICS_FILE), json.as_bytes())?;

        write_timeline(&dir.join(TIMELINE_FILE), outcome)?;

        let trace = outcome
            .segmentation
            .as_ref()
            .map(|s| s.trace.as_str())
            .unwrap_or_default();
        write_file(&dir.join(TRACE_FILE), trace.as_bytes())?;

        let mut raw = String::new();
        for (index, poll) in outcome.raw_log.iter().enumerate() {
            raw.push_str(&format!("# poll {index}\n{poll}"));
            if !poll.ends_with('\n') {
                raw.push('\n');
            }
        }
        write_file(&dir.join(RAW_LOG_FILE), raw.as_bytes())?;

        Ok(dir)
    }
}

/// Read an exported metric map, optionally scoped to `device`.
pub fn load_metrics(path: &Path, device: Option<String>) -> Result<MetricData> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read metrics from {}", path.display()))?;
    let data: MetricData = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse metrics from {}", path.display()))?;
    Ok(data.with_device(device))
}

/// The part of `run.json` needed to re-evaluate a run.
#[derive(Deserialize)]
struct RunStatus {
    terminated: bool,
}

/// Whether the run saved in `run.json` at `path` ended with the application terminating.
pub fn load_run_terminated(path: &Path) -> Result<bool> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read run report from {}", path.display()))?;
    let status: RunStatus = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse run report from {}", path.display()))?;
    Ok(status.terminated)
}

fn write_timeline(path: &Path, outcome: &RunOutcome) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create timeline at {}", path.display()))?;
    for frame in &outcome.frames {
        writer.serialize(frame)?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write timeline to {}", path.display()))?;
    Ok(())
}

fn write_file(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(content)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
