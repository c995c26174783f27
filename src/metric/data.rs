//! Flat, string-keyed metric map used to hand run results to reporters
//!
//! Keys are written as `run_<loop>.<channel>_<label>` plus the top-level
//! `loop_count`, `jank_rate` and `load_time`. When a run spans more than one
//! device every key is scoped as `{<device>}:<key>`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// A single metric value, tagged with its numeric kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricValue {
    Int(i64),
    Double(f64),
}

#[derive(Error, Debug, PartialEq)]
pub enum MetricParseError {
    #[error("missing metric: {0}")]
    MissingKey(String),

    #[error("metric {key} has the wrong type (expected {expected})")]
    WrongType { key: String, expected: &'static str },
}

/// Metric map for one run, optionally scoped to a device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricData {
    #[serde(skip)]
    device: Option<String>,
    metrics: BTreeMap<String, MetricValue>,
}

impl MetricData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope all reads and writes to `device`.
    pub fn with_device(mut self, device: Option<String>) -> Self {
        self.device = device;
        self
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetricValue)> {
        self.metrics.iter()
    }

    pub fn put_int(&mut self, key: impl AsRef<str>, value: i64) {
        let key = self.scoped_key(key.as_ref());
        self.metrics.insert(key, MetricValue::Int(value));
    }

    pub fn put_double(&mut self, key: impl AsRef<str>, value: f64) {
        let key = self.scoped_key(key.as_ref());
        self.metrics.insert(key, MetricValue::Double(value));
    }

    pub fn get_int(&self, key: &str) -> Result<i64, MetricParseError> {
        match self.lookup(key)? {
            MetricValue::Int(value) => Ok(value),
            MetricValue::Double(_) => Err(MetricParseError::WrongType {
                key: key.to_string(),
                expected: "int",
            }),
        }
    }

    pub fn get_double(&self, key: &str) -> Result<f64, MetricParseError> {
        match self.lookup(key)? {
            MetricValue::Double(value) => Ok(value),
            MetricValue::Int(_) => Err(MetricParseError::WrongType {
                key: key.to_string(),
                expected: "double",
            }),
        }
    }

    fn lookup(&self, key: &str) -> Result<MetricValue, MetricParseError> {
        let scoped = self.scoped_key(key);
        self.metrics
            .get(&scoped)
            .copied()
            .ok_or(MetricParseError::MissingKey(scoped))
    }

    fn scoped_key(&self, key: &str) -> String {
        match &self.device {
            Some(device) => format!("{{{device}}}:{key}"),
            None => key.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MetricData, MetricParseError, MetricValue};

    #[test]
    fn typed_reads_reject_wrong_kind() {
        let mut data = MetricData::new();
        data.put_int("loop_count", 3);
        data.put_double("jank_rate", 0.25);

        assert_eq!(data.get_int("loop_count"), Ok(3));
        assert_eq!(data.get_double("jank_rate"), Ok(0.25));
        assert_eq!(
            data.get_double("loop_count"),
            Err(MetricParseError::WrongType {
                key: "loop_count".to_string(),
                expected: "double",
            })
        );
        assert_eq!(
            data.get_int("load_time"),
            Err(MetricParseError::MissingKey("load_time".to_string()))
        );
    }

    #[test]
    fn device_scope_prefixes_keys() {
        let mut data = MetricData::new().with_device(Some("emulator-5554".to_string()));
        data.put_int("loop_count", 1);

        let keys: Vec<_> = data.iter().map(|(key, _)| key.clone()).collect();
        assert_eq!(keys, vec!["{emulator-5554}:loop_count".to_string()]);
        assert_eq!(data.get_int("loop_count"), Ok(1));

        let unscoped = data.clone().with_device(None);
        assert!(unscoped.get_int("loop_count").is_err());
    }

    #[test]
    fn serializes_as_tagged_values() {
        let mut data = MetricData::new();
        data.put_int("load_time", -1);
        data.put_double("jank_rate", 0.5);

        let json = serde_json::to_string(&data).unwrap();
        assert_eq!(
            json,
            r#"{"metrics":{"jank_rate":{"double":0.5},"load_time":{"int":-1}}}"#
        );

        let parsed: MetricData = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.get_int("load_time"), Ok(-1));
        assert!(matches!(
            parsed.iter().next(),
            Some((_, MetricValue::Double(_)))
        ));
    }
}
