//! Fixed-width histogram with optional clipping bounds

use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Bucketed counts of integer samples.
///
/// Samples below `min` are counted in the `min` bucket and samples above `max`
/// in the `max` bucket. Everything else goes to the nearest multiple of the
/// bucket size. With an even bucket size a sample can sit exactly on a bucket
/// boundary; it is then counted in the higher bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Histogram {
    min: Option<i64>,
    max: Option<i64>,
    counts: BTreeMap<i64, usize>,
}

impl Histogram {
    pub fn new<I>(data: I, bucket_size: i64, min: Option<i64>, max: Option<i64>) -> Self
    where
        I: IntoIterator<Item = i64>,
    {
        assert!(bucket_size > 0, "bucket size must be positive");

        let mut counts = BTreeMap::new();
        for value in data {
            let key = bucket_key(value, bucket_size, min, max);
            *counts.entry(key).or_insert(0) += 1;
        }

        Self {
            min,
            max,
            counts,
        }
    }

    pub fn counts(&self) -> &BTreeMap<i64, usize> {
        &self.counts
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Render one row per bucket, the largest bucket drawn `max_bar_width` wide.
    pub fn plot_ascii(&self, max_bar_width: usize) -> String {
        let mut out = String::new();
        let Some(max_count) = self.counts.values().copied().max() else {
            return out;
        };

        let label_width = self
            .counts
            .keys()
            .map(|key| key.to_string().len())
            .max()
            .unwrap_or(1);

        for (&key, &count) in &self.counts {
            let marker = if self.min == Some(key) {
                '<'
            } else if self.max == Some(key) {
                '>'
            } else {
                ' '
            };
            let bar = count * max_bar_width / max_count;
            let _ = writeln!(
                out,
                "{marker}{key:>label_width$}| {}",
                "=".repeat(bar)
            );
        }
        out
    }
}

fn bucket_key(value: i64, bucket_size: i64, min: Option<i64>, max: Option<i64>) -> i64 {
    if let Some(min) = min {
        if value < min {
            return min;
        }
    }
    if let Some(max) = max {
        if value > max {
            return max;
        }
    }
    // floor(value / size + 0.5) * size, kept in integers
    (2 * value + bucket_size).div_euclid(2 * bucket_size) * bucket_size
}
