//! Application lifecycle events
//!
//! The application under test reports when it was launched and when each
//! measured loop begins. The log is read once, after sampling stops.
//!
//! File format (JSON):
//!   [{"kind": "app_launch", "timestamp_ms": 1000},
//!    {"kind": "start_loop", "timestamp_ms": 1042}]

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

const NS_PER_MS: i64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AppLaunch,
    StartLoop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub kind: EventKind,
    pub timestamp_ms: i64,
}

impl LifecycleEvent {
    #[cfg(test)]
    pub fn new(kind: EventKind, timestamp_ms: i64) -> Self {
        Self { kind, timestamp_ms }
    }

    /// Timestamp on the same clock as frame present times.
    pub fn timestamp_ns(&self) -> i64 {
        self.timestamp_ms * NS_PER_MS
    }
}

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("failed to read lifecycle log: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse lifecycle log: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("event {index} at {timestamp_ms} ms is earlier than the previous event")]
    OutOfOrder { index: usize, timestamp_ms: i64 },

    #[error("first app launch at {launch_ms} ms follows a loop start at {loop_ms} ms")]
    LaunchAfterLoop { launch_ms: i64, loop_ms: i64 },
}

/// Ordered lifecycle events of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleLog {
    events: Vec<LifecycleEvent>,
}

impl LifecycleLog {
    /// Validate ordering: timestamps never decrease and the first launch
    /// precedes every loop start.
    pub fn new(events: Vec<LifecycleEvent>) -> Result<Self, LifecycleError> {
        for (index, pair) in events.windows(2).enumerate() {
            if pair[1].timestamp_ms < pair[0].timestamp_ms {
                return Err(LifecycleError::OutOfOrder {
                    index: index + 1,
                    timestamp_ms: pair[1].timestamp_ms,
                });
            }
        }

        let first_launch = events.iter().position(|e| e.kind == EventKind::AppLaunch);
        let first_loop = events.iter().position(|e| e.kind == EventKind::StartLoop);
        if let (Some(launch), Some(start)) = (first_launch, first_loop) {
            if start < launch {
                return Err(LifecycleError::LaunchAfterLoop {
                    launch_ms: events[launch].timestamp_ms,
                    loop_ms: events[start].timestamp_ms,
                });
            }
        }

        Ok(Self { events })
    }

    pub fn from_json(content: &str) -> Result<Self, LifecycleError> {
        let events: Vec<LifecycleEvent> = serde_json::from_str(content)?;
        Self::new(events)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LifecycleError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    pub fn events(&self) -> &[LifecycleEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn app_launch(&self) -> Option<&LifecycleEvent> {
        self.events.iter().find(|e| e.kind == EventKind::AppLaunch)
    }

    pub fn loop_starts(&self) -> impl Iterator<Item = &LifecycleEvent> {
        self.events.iter().filter(|e| e.kind == EventKind::StartLoop)
    }
}

#[cfg(test)]
mod tests {
    use super::{EventKind, LifecycleError, LifecycleEvent, LifecycleLog};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn parses_json_log() {
        let log = LifecycleLog::from_json(
            r#"[{"kind":"app_launch","timestamp_ms":1000},
                {"kind":"start_loop","timestamp_ms":1042},
                {"kind":"start_loop","timestamp_ms":2042}]"#,
        )
        .expect("valid log");

        assert_eq!(log.events().len(), 3);
        assert_eq!(log.app_launch().map(|e| e.timestamp_ns()), Some(1_000_000_000));
        let starts: Vec<i64> = log.loop_starts().map(|e| e.timestamp_ms).collect();
        assert_eq!(starts, vec![1042, 2042]);
    }

    #[test]
    fn rejects_decreasing_timestamps() {
        let err = LifecycleLog::new(vec![
            LifecycleEvent::new(EventKind::StartLoop, 20),
            LifecycleEvent::new(EventKind::StartLoop, 10),
        ])
        .unwrap_err();
        assert!(matches!(err, LifecycleError::OutOfOrder { index: 1, .. }));
    }

    #[test]
    fn rejects_launch_after_loop_start() {
        let err = LifecycleLog::new(vec![
            LifecycleEvent::new(EventKind::StartLoop, 10),
            LifecycleEvent::new(EventKind::AppLaunch, 10),
        ])
        .unwrap_err();
        assert!(matches!(err, LifecycleError::LaunchAfterLoop { .. }));
    }

    #[test]
    fn loads_from_file() {
        let mut file = NamedTempFile::new().expect("temp file");
        write!(file, r#"[{{"kind":"start_loop","timestamp_ms":5}}]"#).expect("write log");

        let log = LifecycleLog::load(file.path()).expect("load log");
        assert!(log.app_launch().is_none());
        assert_eq!(log.loop_starts().count(), 1);
    }
}
