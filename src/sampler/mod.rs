//! Frame sampling: polling, deduplication and loop segmentation

mod collector;
pub mod parser;
pub mod segment;
pub mod state;

pub use collector::{FrameSampler, RunCollector, RunOutcome, SamplerOptions, Schedule};
