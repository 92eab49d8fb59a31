//! Text tables for histogram snapshots.
//!
//! Rendering never touches the histograms it is given; every function returns the finished
//! text so the caller decides where it goes.

use std::fmt::Write;

use serde::Deserialize;

use crate::histogram::{Estimate, Estimator, Histogram, HistogramSnapshot, QueryError};
use crate::source::EntityId;

const RULE: &str = "------------------------";

/// How bucket slots are labelled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeMode {
    /// Print the slot number itself.
    Raw,
    /// Print the microsecond range a log2 slot covers.
    #[default]
    Log2,
}

/// Inclusive latency range in microseconds covered by a log2 slot.
///
/// Slot `s` covers `[2^s, 2^(s+1) - 1]`, except slot 0 which starts at 0.
pub fn log2_range(slot: u64) -> (u128, u128) {
    let start = if slot == 0 { 0 } else { pow2(slot).unwrap_or(u128::MAX) };
    let end = slot
        .checked_add(1)
        .and_then(pow2)
        .map_or(u128::MAX, |v| v - 1);
    (start, end)
}

fn pow2(exp: u64) -> Option<u128> {
    u32::try_from(exp).ok().and_then(|e| 1u128.checked_shl(e))
}

pub fn slot_label(slot: u64, mode: RangeMode) -> String {
    match mode {
        RangeMode::Raw => slot.to_string(),
        RangeMode::Log2 => {
            let (start, end) = log2_range(slot);
            format!("{}->{}", start, end)
        }
    }
}

/// One line per bucket: label and count.
pub fn render(histogram: &Histogram, mode: RangeMode) -> String {
    let mut out = String::new();
    for bucket in histogram.buckets() {
        let _ = writeln!(out, "{:>20}: {:>10}", slot_label(bucket.slot, mode), bucket.count);
    }
    out
}

/// What a report shows for a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportOptions {
    /// Restrict output to one entity.
    pub pid: Option<EntityId>,
    pub range_mode: RangeMode,
    pub histogram: bool,
    /// Bucket-floor percentiles to tabulate; an empty list disables the table.
    pub percentiles: Vec<f64>,
    /// Interpolated 99th percentile table.
    pub p99: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            pid: None,
            range_mode: RangeMode::Log2,
            histogram: true,
            percentiles: Vec::new(),
            p99: false,
        }
    }
}

impl ReportOptions {
    fn selects(&self, entity: EntityId) -> bool {
        self.pid.is_none_or(|pid| pid == entity)
    }
}

pub fn render_histograms(snapshot: &HistogramSnapshot, options: &ReportOptions) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Run Queue Latency Histogram:");
    let _ = writeln!(out, "{}", RULE);
    let unit = match options.range_mode {
        RangeMode::Raw => "Slot",
        RangeMode::Log2 => "Latency (us)",
    };
    for (id, histogram) in snapshot.iter().filter(|(id, _)| options.selects(*id)) {
        let _ = writeln!(out, "Pid={} | {}  |  Count", id, unit);
        out.push_str(&render(histogram, options.range_mode));
        out.push('\n');
    }
    let _ = writeln!(out, "{}", RULE);
    out
}

pub fn render_percentiles(
    snapshot: &HistogramSnapshot,
    percentiles: &[f64],
    pid: Option<EntityId>,
) -> String {
    let estimator = Estimator::bucket_floor();
    let mut out = String::new();
    let _ = writeln!(out, "Run Queue Latency -- Percentiles");
    let _ = write!(out, " Pid    ");
    for p in percentiles {
        let _ = write!(out, "| p{:.2} Latency (us) ", p);
    }
    out.push('\n');
    let _ = writeln!(out, "{}", RULE);

    for (id, histogram) in snapshot.iter().filter(|(id, _)| pid.is_none_or(|p| p == *id)) {
        let _ = write!(out, "{:<8}", id);
        for &p in percentiles {
            let _ = write!(out, "|    {:>10}", format_estimate(estimator.estimate(histogram, p)));
        }
        out.push('\n');
    }
    let _ = writeln!(out, "{}", RULE);
    out
}

pub fn render_p99(snapshot: &HistogramSnapshot, pid: Option<EntityId>) -> String {
    let estimator = Estimator::interpolated();
    let mut out = String::new();
    let _ = writeln!(out, "Run Queue Latency P99:");
    let _ = writeln!(out, " Pid    | P99 Latency (us) ");
    let _ = writeln!(out, "{}", RULE);
    for (id, histogram) in snapshot.iter().filter(|(id, _)| pid.is_none_or(|p| p == *id)) {
        let _ = writeln!(
            out,
            "{:<8}|    {:>10} ",
            id,
            format_estimate(estimator.estimate(histogram, 99.0))
        );
    }
    let _ = writeln!(out, "{}", RULE);
    out
}

/// Full report for one poll cycle.
pub fn render_report(snapshot: &HistogramSnapshot, options: &ReportOptions) -> String {
    if snapshot.is_empty() {
        return "No data recorded yet.\n".to_string();
    }

    let mut sections = Vec::new();
    if options.histogram {
        sections.push(render_histograms(snapshot, options));
    }
    if !options.percentiles.is_empty() {
        sections.push(render_percentiles(
            snapshot,
            &options.percentiles,
            options.pid,
        ));
    }
    if options.p99 {
        sections.push(render_p99(snapshot, options.pid));
    }
    sections.join("\n")
}

/// `-` marks a query without an answer so it never reads as a zero latency.
fn format_estimate(estimate: Result<Estimate, QueryError>) -> String {
    match estimate {
        Ok(Estimate::Slot(slot)) => slot.to_string(),
        Ok(Estimate::Interpolated(value)) => format!("{:.0}", value),
        Err(_) => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::{DuplicatePolicy, from_samples};
    use crate::source::Sample;

    fn snapshot(samples: &[(EntityId, u64, u64)]) -> HistogramSnapshot {
        from_samples(
            samples.iter().map(|&(e, s, c)| Ok(Sample::new(e, s, c))),
            DuplicatePolicy::Sum,
        )
    }

    #[test]
    fn test_log2_range() {
        assert_eq!(log2_range(0), (0, 1));
        assert_eq!(log2_range(1), (2, 3));
        assert_eq!(log2_range(10), (1024, 2047));
        assert_eq!(log2_range(63), (1 << 63, (1u128 << 64) - 1));
    }

    #[test]
    fn test_log2_range_saturates() {
        assert_eq!(log2_range(127), (1u128 << 127, u128::MAX));
        assert_eq!(log2_range(200), (u128::MAX, u128::MAX));
        assert_eq!(log2_range(u64::MAX), (u128::MAX, u128::MAX));
    }

    #[test]
    fn test_render_raw_keeps_slots() {
        let h = Histogram::from_parts(&[0, 5], &[3, 7]).unwrap();
        let text = render(&h, RangeMode::Raw);
        assert_eq!(
            text,
            format!("{:>20}: {:>10}\n{:>20}: {:>10}\n", 0, 3, 5, 7)
        );
    }

    #[test]
    fn test_render_log2_labels() {
        let h = Histogram::from_parts(&[0, 3], &[1, 2]).unwrap();
        let text = render(&h, RangeMode::Log2);
        let lines: Vec<&str> = text.lines().map(str::trim).collect();
        assert_eq!(lines, vec!["0->1:          1", "8->15:          2"]);
    }

    #[test]
    fn test_render_does_not_mutate() {
        let h = Histogram::from_parts(&[4, 1], &[1, 1]).unwrap();
        let before = h.clone();
        let _ = render(&h, RangeMode::Log2);
        assert_eq!(h, before);
    }

    #[test]
    fn test_report_empty_snapshot() {
        let text = render_report(&HistogramSnapshot::default(), &ReportOptions::default());
        assert_eq!(text, "No data recorded yet.\n");
    }

    #[test]
    fn test_report_pid_filter() {
        let snap = snapshot(&[(10, 1, 1), (20, 2, 2)]);
        let options = ReportOptions {
            pid: Some(20),
            ..Default::default()
        };
        let text = render_report(&snap, &options);
        assert!(text.contains("Pid=20"));
        assert!(!text.contains("Pid=10"));
    }

    #[test]
    fn test_percentile_table() {
        let snap = snapshot(&[(1, 1, 5), (1, 2, 15), (1, 3, 30), (1, 4, 25), (1, 5, 25)]);
        let text = render_percentiles(&snap, &[50.0, 90.0], None);
        assert!(text.contains("| p50.00 Latency (us) | p90.00 Latency (us) "));
        let row = text.lines().find(|l| l.starts_with('1')).unwrap();
        let cells: Vec<&str> = row.split('|').map(str::trim).collect();
        assert_eq!(cells, vec!["1", "3", "5"]);
    }

    #[test]
    fn test_no_result_is_not_zero() {
        let snap = snapshot(&[(1, 0, 0), (2, 0, 4)]);
        let text = render_percentiles(&snap, &[50.0], None);
        let rows: Vec<Vec<&str>> = text
            .lines()
            .filter(|l| l.starts_with('1') || l.starts_with('2'))
            .map(|l| l.split('|').map(str::trim).collect())
            .collect();
        assert_eq!(rows, vec![vec!["1", "-"], vec!["2", "0"]]);
    }

    #[test]
    fn test_p99_table() {
        let snap = snapshot(&[(9, 6, 100)]);
        let text = render_p99(&snap, None);
        let row = text.lines().find(|l| l.starts_with('9')).unwrap();
        let cells: Vec<&str> = row.split('|').map(str::trim).collect();
        assert_eq!(cells, vec!["9", "12"]);
    }

    #[test]
    fn test_report_sections() {
        let snap = snapshot(&[(1, 2, 3)]);
        let options = ReportOptions {
            histogram: false,
            percentiles: vec![50.0],
            p99: true,
            ..Default::default()
        };
        let text = render_report(&snap, &options);
        assert!(!text.contains("Histogram"));
        assert!(text.contains("Percentiles"));
        assert!(text.contains("P99"));
    }
}
