//! Parser for `dumpsys SurfaceFlinger --latency` output
//!
//! Format:
//!   <vsync period ns>
//!   <desired present>\t<actual present>\t<frame ready>
//!   ...
//! Lines that are not exactly three tab-separated integers are ignored.

/// One polled frame line. All values are nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSample {
    pub desired_present: i64,
    pub actual_present: i64,
    pub frame_ready: i64,
}

/// Parsed output of a single poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LatencyDump {
    /// Value of line 0, if it parses as an integer
    pub vsync_period_ns: Option<i64>,
    /// Frame triples in output order
    pub samples: Vec<RawSample>,
    /// Whether anything besides the vsync line was printed
    pub has_frame_lines: bool,
}

impl LatencyDump {
    pub fn parse(raw: &str) -> Self {
        let mut lines = raw.lines();
        let Some(first) = lines.next() else {
            return Self::default();
        };

        let mut dump = LatencyDump {
            vsync_period_ns: first.trim().parse::<i64>().ok(),
            ..Self::default()
        };

        for line in lines {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            dump.has_frame_lines = true;
            if let Some(sample) = parse_sample_line(line) {
                dump.samples.push(sample);
            }
        }

        dump
    }
}

pub fn latency_command(layer_name: &str) -> String {
    format!("dumpsys SurfaceFlinger --latency \"{layer_name}\"")
}

fn parse_sample_line(line: &str) -> Option<RawSample> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 3 {
        return None;
    }
    Some(RawSample {
        desired_present: parse_timestamp(fields[0])?,
        actual_present: parse_timestamp(fields[1])?,
        frame_ready: parse_timestamp(fields[2])?,
    })
}

fn parse_timestamp(value: &str) -> Option<i64> {
    value.trim().parse::<i64>().ok()
}

#[cfg(test)]
mod tests {
    use super::{latency_command, LatencyDump, RawSample};

    #[test]
    fn parses_vsync_and_triples() {
        let dump = LatencyDump::parse("16666666\n1\t2\t3\n4\t5\t6\n");
        assert_eq!(dump.vsync_period_ns, Some(16_666_666));
        assert!(dump.has_frame_lines);
        assert_eq!(
            dump.samples,
            vec![
                RawSample {
                    desired_present: 1,
                    actual_present: 2,
                    frame_ready: 3
                },
                RawSample {
                    desired_present: 4,
                    actual_present: 5,
                    frame_ready: 6
                },
            ]
        );
    }

    #[test]
    fn ignores_malformed_lines() {
        let dump = LatencyDump::parse("16666666\n1\t2\n1\t2\t3\t4\na\tb\tc\n7\t8\t9\r\n");
        assert_eq!(dump.samples.len(), 1);
        assert_eq!(dump.samples[0].actual_present, 8);
        assert!(dump.has_frame_lines);
    }

    #[test]
    fn vsync_only_output_has_no_frame_lines() {
        let dump = LatencyDump::parse("16666666\n\n");
        assert_eq!(dump.vsync_period_ns, Some(16_666_666));
        assert!(!dump.has_frame_lines);
        assert!(dump.samples.is_empty());

        assert_eq!(LatencyDump::parse(""), LatencyDump::default());
    }

    #[test]
    fn keeps_pending_fence_sentinel() {
        let dump = LatencyDump::parse(&format!("1\n0\t{}\t0\n", i64::MAX));
        assert_eq!(dump.samples[0].actual_present, i64::MAX);
    }

    #[test]
    fn builds_quoted_command() {
        assert_eq!(
            latency_command("SurfaceView - com.example/.Main#0"),
            "dumpsys SurfaceFlinger --latency \"SurfaceView - com.example/.Main#0\""
        );
    }
}
