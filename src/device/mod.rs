//! Device command channel
//!
//! The sampler only needs to run a diagnostic command on the target and read
//! its text output back, plus pull the lifecycle log once the run is over.

mod adb;

pub use adb::AdbDevice;

use std::path::Path;
use thiserror::Error;

/// Device command errors
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Device unavailable: {0}")]
    Unavailable(String),

    #[error("Command timed out after {0}s")]
    Timeout(u64),

    #[error("Command failed with status {status}: {output}")]
    CommandFailed { status: String, output: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability to run commands against one target device.
///
/// Calls block until the command completes or the implementation's own
/// timeout expires.
pub trait DeviceCommand: Send + Sync {
    /// Human-readable device identifier
    fn name(&self) -> &str;

    /// Run a shell command on the device and return its standard output.
    fn execute_shell(&self, command: &str) -> Result<String, DeviceError>;

    /// Copy a file from the device to the host.
    fn pull_file(&self, remote: &str, local: &Path) -> Result<(), DeviceError>;
}
