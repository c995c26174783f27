//! frame-cert - Frame-timing certification for Android workloads
//!
//! Samples the frame timeline of one SurfaceFlinger layer while a workload
//! runs, splits it into the loops the application reports, and certifies the
//! result against jank and load time thresholds.

mod config;
mod device;
mod lifecycle;
mod metric;
mod report;
mod sampler;
mod storage;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{validate_requirements, Config};
use crate::device::{AdbDevice, DeviceCommand};
use crate::lifecycle::LifecycleLog;
use crate::metric::{CertificationRequirements, MetricSummary};
use crate::report::{frame_time_histogram, RunReport, Verdict};
use crate::sampler::{FrameSampler, RunCollector, Schedule};
use crate::storage::RunStorage;

const FINISH_CHECK_MS: u64 = 200;

/// frame-cert - Certify frame pacing of an Android workload
#[derive(Parser)]
#[command(name = "frame-cert")]
#[command(version)]
#[command(about = "Sample SurfaceFlinger frame timing and certify it against thresholds")]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample one run and certify it
    Certify {
        /// SurfaceFlinger layer to sample
        #[arg(short, long)]
        layer: String,

        /// Device serial (overrides config)
        #[arg(short, long)]
        serial: Option<String>,

        /// Stop sampling after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,

        /// Lifecycle events JSON file on this machine
        #[arg(long, conflicts_with = "device_events")]
        events: Option<PathBuf>,

        /// Lifecycle events JSON file on the device, pulled after sampling
        #[arg(long)]
        device_events: Option<String>,

        /// Write run outputs to this directory
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Poll at a fixed rate
        #[arg(long, default_value_t = false)]
        fixed_rate: bool,

        /// Poll interval in milliseconds (overrides config)
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Workload name used in the report
        #[arg(long)]
        name: Option<String>,

        /// Target frame time in milliseconds
        #[arg(long)]
        frame_time_ms: Option<f64>,

        /// Maximum jank events per second
        #[arg(long)]
        max_jank_rate: Option<f64>,

        /// Maximum load time in milliseconds; negative disables the check
        #[arg(long, allow_negative_numbers = true)]
        max_load_time_ms: Option<i64>,
    },

    /// Re-evaluate an exported metrics file
    Report {
        /// Path to metrics.json
        #[arg(short, long)]
        metrics: PathBuf,

        /// Device name the metrics are scoped to
        #[arg(long)]
        device: Option<String>,

        /// run.json of the same run, to carry over whether the application terminated
        #[arg(long)]
        run: Option<PathBuf>,
    },

    /// Show configuration path and effective settings
    Config,
}

struct CertifyArgs {
    layer: String,
    serial: Option<String>,
    duration: Option<u64>,
    events: Option<PathBuf>,
    device_events: Option<String>,
    out: Option<PathBuf>,
    fixed_rate: bool,
    interval_ms: Option<u64>,
}

struct RequirementOverrides {
    name: Option<String>,
    frame_time_ms: Option<f64>,
    max_jank_rate: Option<f64>,
    max_load_time_ms: Option<i64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Certify {
            layer,
            serial,
            duration,
            events,
            device_events,
            out,
            fixed_rate,
            interval_ms,
            name,
            frame_time_ms,
            max_jank_rate,
            max_load_time_ms,
        } => {
            let config = Config::init()?;
            let requirements = resolve_requirements(
                config.requirements.clone(),
                &layer,
                RequirementOverrides {
                    name,
                    frame_time_ms,
                    max_jank_rate,
                    max_load_time_ms,
                },
            )?;
            let args = CertifyArgs {
                layer,
                serial,
                duration,
                events,
                device_events,
                out,
                fixed_rate,
                interval_ms,
            };

            let rt = tokio::runtime::Runtime::new()?;
            let passed = rt.block_on(run_certify(args, &config, requirements))?;
            if !passed {
                std::process::exit(1);
            }
        }
        Commands::Report {
            metrics,
            device,
            run,
        } => {
            let config = Config::load()?;
            if !run_report(&metrics, device, run.as_deref(), &config)? {
                std::process::exit(1);
            }
        }
        Commands::Config => show_config()?,
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Merge command line thresholds over the configured ones.
fn resolve_requirements(
    configured: Option<CertificationRequirements>,
    layer: &str,
    overrides: RequirementOverrides,
) -> Result<Option<CertificationRequirements>> {
    let has_override = overrides.frame_time_ms.is_some()
        || overrides.max_jank_rate.is_some()
        || overrides.max_load_time_ms.is_some();
    if !has_override {
        if let (Some(requirements), Some(name)) = (&configured, overrides.name) {
            return Ok(Some(CertificationRequirements {
                name,
                ..requirements.clone()
            }));
        }
        return Ok(configured);
    }

    let frame_time_ms = overrides
        .frame_time_ms
        .or(configured.as_ref().map(|r| r.frame_time_ms))
        .context("--frame-time-ms is required when no requirements are configured")?;
    let max_jank_rate = overrides
        .max_jank_rate
        .or(configured.as_ref().map(|r| r.max_jank_rate))
        .context("--max-jank-rate is required when no requirements are configured")?;
    let max_load_time_ms = overrides
        .max_load_time_ms
        .or(configured.as_ref().map(|r| r.max_load_time_ms))
        .unwrap_or(-1);
    let name = overrides
        .name
        .or(configured.map(|r| r.name).filter(|n| !n.is_empty()))
        .unwrap_or_else(|| layer.to_string());

    let requirements =
        CertificationRequirements::new(name, frame_time_ms, max_jank_rate, max_load_time_ms);
    validate_requirements(&requirements)?;
    Ok(Some(requirements))
}

async fn run_certify(
    args: CertifyArgs,
    config: &Config,
    requirements: Option<CertificationRequirements>,
) -> Result<bool> {
    let device = Arc::new(AdbDevice::new(
        &config.device.adb_path,
        args.serial.clone().or_else(|| config.device.serial.clone()),
        Duration::from_secs(config.device.command_timeout_seconds),
    ));

    let mut options = config.sampler_options(&args.layer);
    if let Some(interval_ms) = args.interval_ms {
        options.interval = Duration::from_millis(interval_ms);
    }
    if args.fixed_rate {
        options.schedule = Schedule::FixedRate;
    }
    options.validate()?;

    println!(
        "{} {} on {}",
        "Sampling".bright_cyan().bold(),
        args.layer.bold(),
        device.name()
    );
    if requirements.is_none() {
        println!(
            "{}",
            "No certification requirements configured; performance will not be checked."
                .bright_yellow()
        );
    }

    let mut sampler = FrameSampler::new(Arc::clone(&device), options, requirements.clone());
    sampler.on_run_start()?;

    let stop_after = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = stop_after => info!("Run duration elapsed"),
        _ = wait_for_shutdown() => {},
        _ = wait_for_finish(&sampler) => {},
    }

    let phase = sampler.phase().await;
    info!(%phase, "Stopping sampler");

    let events = match load_events(&args, &device).await {
        Ok(events) => {
            if events.is_empty() {
                warn!("Lifecycle log is empty; no loops can be reported");
            } else {
                info!(events = events.events().len(), "Lifecycle events loaded");
            }
            events
        }
        Err(err) => {
            println!(
                "{} {}",
                "Could not load lifecycle events:".bright_red(),
                format!("{err:#}").bright_red()
            );
            LifecycleLog::default()
        }
    };

    let outcome = sampler.on_run_end(&events).await?;
    let report = RunReport::new(device.name(), &args.layer, &outcome, requirements.as_ref());

    println!();
    if let Some(segmentation) = &outcome.segmentation {
        println!("{}", segmentation.summary);

        let histogram = frame_time_histogram(&segmentation.present_frame_times, &config.report);
        if !histogram.is_empty() {
            println!("{}", "Frame time histogram (ms):".bright_cyan().bold());
            print!("{}", histogram.plot_ascii(config.report.histogram_bar_width));
            println!();
        }
        if let Some((bucket_ms, frames)) = histogram.counts().iter().max_by_key(|(_, n)| **n) {
            debug!(bucket_ms = *bucket_ms, frames = *frames, "Most common frame time");
        }
    }
    let loops = outcome
        .segmentation
        .as_ref()
        .map_or(0, |s| s.summary.loop_count());
    println!(
        "Loops: {}  Frames: {}  Polls: {}  Missed overlaps: {}  Duration: {:.1}s",
        loops,
        report.frames,
        report.polls,
        report.missed_overlaps,
        report.duration_secs()
    );
    if report.missed_overlaps > 0 {
        println!(
            "{}",
            "Some polls did not overlap; frames may have been missed. Consider a shorter interval."
                .bright_yellow()
        );
    }

    print_verdict(&report.verdict);

    let storage = match (&args.out, &config.report.output_dir) {
        (Some(out), _) => RunStorage::exact(out),
        (None, Some(dir)) => RunStorage::under(dir),
        (None, None) => RunStorage::new()?,
    };
    let dir = storage.save_run(&report, &outcome)?;
    println!("\n{} {}", "Run saved to".bright_green(), dir.display());

    Ok(report.verdict.passed)
}

async fn wait_for_finish<D: DeviceCommand + 'static>(sampler: &FrameSampler<D>) {
    while !sampler.finished() {
        tokio::time::sleep(Duration::from_millis(FINISH_CHECK_MS)).await;
    }
    info!("Sampling ended on its own");
}

/// Wait for Ctrl+C or SIGTERM
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, stopping"),
        _ = terminate => info!("Received SIGTERM, stopping"),
    }
}

async fn load_events(args: &CertifyArgs, device: &Arc<AdbDevice>) -> Result<LifecycleLog> {
    if let Some(path) = &args.events {
        return LifecycleLog::load(path)
            .with_context(|| format!("Failed to load events from {}", path.display()));
    }

    let Some(remote) = args.device_events.clone() else {
        warn!("No lifecycle events supplied; no loops can be reported");
        return Ok(LifecycleLog::default());
    };

    let local = std::env::temp_dir().join(format!("frame-cert-events-{}.json", uuid::Uuid::new_v4()));
    let device = Arc::clone(device);
    let target = local.clone();
    let pulled = tokio::task::spawn_blocking(move || device.pull_file(&remote, &target)).await?;
    pulled.context("Failed to pull lifecycle events from device")?;

    let events = LifecycleLog::load(&local);
    let _ = std::fs::remove_file(&local);
    Ok(events?)
}

fn run_report(
    path: &std::path::Path,
    device: Option<String>,
    run: Option<&std::path::Path>,
    config: &Config,
) -> Result<bool> {
    let data = storage::load_metrics(path, device)?;
    if data.is_empty() {
        anyhow::bail!("No metrics found in {}", path.display());
    }
    info!(metrics = data.len(), "Metrics loaded");
    for (key, value) in data.iter() {
        debug!(%key, ?value, "metric");
    }
    let summary = MetricSummary::parse_run_metrics(&data)
        .with_context(|| format!("Incomplete metrics in {}", path.display()))?;

    // metrics.json does not record termination; without run.json only thresholds are checked
    let terminated = match run {
        Some(run) => storage::load_run_terminated(run)?,
        None => false,
    };

    println!("{summary}");
    let verdict = Verdict::evaluate(Some(&summary), config.requirements.as_ref(), terminated);
    print_verdict(&verdict);
    Ok(verdict.passed)
}

fn print_verdict(verdict: &Verdict) {
    println!("{}", "Certification:".bright_cyan().bold());
    for line in verdict.to_string().lines() {
        if line.starts_with("Performance tests") {
            println!("{line}");
        } else if line.starts_with("Warning") {
            println!("{}", line.bright_yellow());
        } else {
            println!("{}", line.bright_red());
        }
    }

    let status = if verdict.passed {
        "PASSED".bright_green().bold()
    } else {
        "FAILED".bright_red().bold()
    };
    println!("\nFrame Timing Certification: {status}");
}

fn show_config() -> Result<()> {
    let config = Config::init()?;
    println!(
        "{} {}",
        "Config file:".bright_cyan().bold(),
        config::get_config_path()?
    );
    let toml = toml::to_string_pretty(&config).context("Failed to serialize config to TOML")?;
    println!("\n{toml}");
    Ok(())
}
