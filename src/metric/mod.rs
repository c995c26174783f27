//! Metric module
//!
//! Frame time statistics: per-loop summaries, the run-level summary with jank
//! scoring, the exported metric map, certification thresholds and histograms.

mod data;
mod histogram;
mod loop_summary;
mod requirements;
mod summary;

pub use data::MetricData;
pub use histogram::Histogram;
pub use requirements::CertificationRequirements;
pub use summary::{Builder, MetricSummary, TimeType};
