//! Configuration management for frame-cert
//!
//! Config file location:
//! - Linux: ~/.config/frame-cert/config.toml
//! - macOS: ~/Library/Application Support/frame-cert/config.toml
//! - Windows: %APPDATA%/frame-cert/config.toml
//!
//! You can override the config location by setting `FRAME_CERT_CONFIG_PATH`.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::metric::CertificationRequirements;
use crate::sampler::{SamplerOptions, Schedule};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Device connection
    #[serde(default)]
    pub device: DeviceConfig,

    /// Polling behavior
    #[serde(default)]
    pub sampler: SamplerConfig,

    /// Default certification thresholds; performance is not checked without them
    #[serde(default)]
    pub requirements: Option<CertificationRequirements>,

    /// Report output
    #[serde(default)]
    pub report: ReportConfig,
}

impl Config {
    /// Load configuration from file or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config from {}", config_path.display()))?;

            Self::from_toml(&content).with_context(|| {
                format!("Failed to parse config from {}", config_path.display())
            })
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, toml)
            .with_context(|| format!("Failed to write config to {}", config_path.display()))?;

        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("FRAME_CERT_CONFIG_PATH") {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Ok(PathBuf::from(trimmed));
            }
        }

        let proj_dirs = ProjectDirs::from("com", "framecert", "frame-cert")
            .context("Could not determine project directories")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Create default config file if it doesn't exist
    pub fn init() -> Result<Self> {
        let config = Self::load()?;

        let config_path = Self::config_path()?;
        if !config_path.exists() {
            config.save()?;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=300).contains(&self.device.command_timeout_seconds) {
            anyhow::bail!("device.command_timeout_seconds must be between 1 and 300");
        }
        if !(10..=60_000).contains(&self.sampler.interval_ms) {
            anyhow::bail!("sampler.interval_ms must be between 10 and 60000");
        }
        if let Some(requirements) = &self.requirements {
            validate_requirements(requirements)?;
        }
        if self.report.histogram_bucket_ms <= 0 {
            anyhow::bail!("report.histogram_bucket_ms must be positive");
        }
        if self.report.histogram_bar_width == 0 {
            anyhow::bail!("report.histogram_bar_width must be positive");
        }
        Ok(())
    }

    /// Sampler options for `layer_name` from the `[sampler]` section.
    pub fn sampler_options(&self, layer_name: &str) -> SamplerOptions {
        SamplerOptions {
            layer_name: layer_name.to_string(),
            interval: Duration::from_millis(self.sampler.interval_ms),
            schedule: if self.sampler.fixed_rate {
                Schedule::FixedRate
            } else {
                Schedule::FixedDelay
            },
            final_drain: self.sampler.final_drain,
        }
    }
}

pub fn validate_requirements(requirements: &CertificationRequirements) -> Result<()> {
    if requirements.frame_time_ms.is_nan() || requirements.frame_time_ms <= 0.0 {
        anyhow::bail!("target frame time must be positive");
    }
    if requirements.max_jank_rate < 0.0 || requirements.max_jank_rate.is_nan() {
        anyhow::bail!("max jank rate must not be negative");
    }
    Ok(())
}

/// Device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Path to the adb executable
    #[serde(default = "default_adb_path")]
    pub adb_path: String,

    /// Device serial; the only attached device is used when unset
    #[serde(default)]
    pub serial: Option<String>,

    /// Timeout for a single device command in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_seconds: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            adb_path: default_adb_path(),
            serial: None,
            command_timeout_seconds: default_command_timeout(),
        }
    }
}

fn default_adb_path() -> String {
    "adb".to_string()
}

fn default_command_timeout() -> u64 {
    10
}

/// Sampler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Time between two polls in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Poll at a fixed rate instead of a fixed delay after each poll
    #[serde(default)]
    pub fixed_rate: bool,

    /// Poll once more when sampling stops
    #[serde(default = "default_true")]
    pub final_drain: bool,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            fixed_rate: false,
            final_drain: true,
        }
    }
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

/// Report configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Histogram bucket width in milliseconds
    #[serde(default = "default_bucket_ms")]
    pub histogram_bucket_ms: i64,

    /// Frame times above this are counted in the last bucket
    #[serde(default = "default_histogram_max_ms")]
    pub histogram_max_ms: Option<i64>,

    /// Width of the longest histogram bar in characters
    #[serde(default = "default_bar_width")]
    pub histogram_bar_width: usize,

    /// Run output directory; defaults to the platform data dir
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            histogram_bucket_ms: default_bucket_ms(),
            histogram_max_ms: default_histogram_max_ms(),
            histogram_bar_width: default_bar_width(),
            output_dir: None,
        }
    }
}

fn default_bucket_ms() -> i64 {
    2
}

fn default_histogram_max_ms() -> Option<i64> {
    Some(100)
}

fn default_bar_width() -> usize {
    50
}

/// Get configuration file path for display purposes
pub fn get_config_path() -> Result<String> {
    let path = Config::config_path()?;
    Ok(path.display().to_string())
}
