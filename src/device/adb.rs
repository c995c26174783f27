//! `adb` backed device channel

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{DeviceCommand, DeviceError};

const WAIT_POLL_MS: u64 = 20;

/// Runs commands through the `adb` executable, optionally pinned to a serial.
#[derive(Debug, Clone)]
pub struct AdbDevice {
    adb_path: PathBuf,
    serial: Option<String>,
    timeout: Duration,
    name: String,
}

impl AdbDevice {
    pub fn new(adb_path: impl Into<PathBuf>, serial: Option<String>, timeout: Duration) -> Self {
        let name = serial.clone().unwrap_or_else(|| "default".to_string());
        Self {
            adb_path: adb_path.into(),
            serial,
            timeout,
            name,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.adb_path);
        if let Some(serial) = self.serial.as_deref() {
            cmd.args(["-s", serial]);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    fn run(&self, mut cmd: Command) -> Result<String, DeviceError> {
        let mut child = cmd.spawn().map_err(|err| {
            DeviceError::Unavailable(format!(
                "failed to run {}: {err}",
                self.adb_path.display()
            ))
        })?;

        // Drain both pipes on helper threads so a chatty command cannot fill either.
        let stdout_reader = child.stdout.take().map(drain);
        let stderr_reader = child.stderr.take().map(drain);

        let status = wait_with_deadline(&mut child, self.timeout)?;
        let stdout = join_output(stdout_reader);
        let stderr = join_output(stderr_reader);

        if !status.success() {
            let output = if stderr.trim().is_empty() { stdout } else { stderr };
            let output = output.trim().to_string();
            if output.contains("device offline")
                || output.contains("no devices")
                || output.contains("not found")
            {
                return Err(DeviceError::Unavailable(output));
            }
            return Err(DeviceError::CommandFailed {
                status: status.to_string(),
                output,
            });
        }

        Ok(stdout)
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = String::new();
        let _ = pipe.read_to_string(&mut buffer);
        buffer
    })
}

fn join_output(reader: Option<JoinHandle<String>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

fn wait_with_deadline(
    child: &mut Child,
    timeout: Duration,
) -> Result<std::process::ExitStatus, DeviceError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(DeviceError::Timeout(timeout.as_secs()));
        }
        thread::sleep(Duration::from_millis(WAIT_POLL_MS));
    }
}

impl DeviceCommand for AdbDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute_shell(&self, command: &str) -> Result<String, DeviceError> {
        let mut cmd = self.command();
        cmd.arg("shell").arg(command);
        self.run(cmd)
    }

    fn pull_file(&self, remote: &str, local: &Path) -> Result<(), DeviceError> {
        let mut cmd = self.command();
        cmd.arg("pull").arg(remote).arg(local);
        self.run(cmd).map(|_| ())
    }
}
