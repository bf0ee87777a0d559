//! Distance metrics between an observed and a synthetic event log.
//!
//! Each metric is a deterministic pure function over two logs, selected by
//! name through the closed [`Metric`] enumeration. One metric is designated
//! the optimization objective per stage; the rest are computed for
//! reporting only.

use chrono::{Datelike, Timelike};
use sf_types::{EventLog, Metric};

/// Dissimilarity between two logs along the named statistical dimension.
///
/// Empty logs compare as maximally distant unless both are empty.
pub fn distance(metric: Metric, a: &EventLog, b: &EventLog) -> f64 {
    if a.is_empty() || b.is_empty() {
        return if a.is_empty() && b.is_empty() { 0.0 } else { 1.0 };
    }
    match metric {
        Metric::ControlFlowLogDistance => control_flow_log_distance(a, b),
        Metric::AbsoluteHourlyEmd => absolute_emd(a, b, 3600),
        Metric::AbsoluteDailyEmd => absolute_emd(a, b, 86_400),
        Metric::CircadianEmd => circadian_emd(a, b),
        Metric::CycleTimeEmd => cycle_time_emd(a, b),
    }
}

/// 1-D earth mover's distance between two histograms, in bin units.
fn emd_1d(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let total_a: f64 = a.iter().sum();
    let total_b: f64 = b.iter().sum();
    if total_a == 0.0 || total_b == 0.0 {
        return if total_a == total_b { 0.0 } else { 1.0 };
    }
    let mut cdf_a = 0.0;
    let mut cdf_b = 0.0;
    let mut emd = 0.0;
    for (&mass_a, &mass_b) in a.iter().zip(b) {
        cdf_a += mass_a / total_a;
        cdf_b += mass_b / total_b;
        emd += (cdf_a - cdf_b).abs();
    }
    emd
}

/// Every start and end timestamp of the log, as seconds past `origin`.
fn timestamp_offsets(log: &EventLog, origin: chrono::DateTime<chrono::Utc>) -> Vec<i64> {
    log.records
        .iter()
        .flat_map(|r| [r.start_time, r.end_time])
        .map(|ts| (ts - origin).num_seconds())
        .collect()
}

/// EMD over absolute timestamps discretized into `bucket_secs` bins,
/// measured from the earliest start across both logs.
fn absolute_emd(a: &EventLog, b: &EventLog, bucket_secs: i64) -> f64 {
    let origin = match (a.span(), b.span()) {
        (Some((start_a, _)), Some((start_b, _))) => start_a.min(start_b),
        _ => return 1.0,
    };
    let offsets_a = timestamp_offsets(a, origin);
    let offsets_b = timestamp_offsets(b, origin);

    let bucket_of = |offset: i64| (offset.max(0) / bucket_secs) as usize;
    let last_bucket = offsets_a
        .iter()
        .chain(&offsets_b)
        .map(|&o| bucket_of(o))
        .max()
        .unwrap_or(0);

    let mut histogram_a = vec![0.0; last_bucket + 1];
    let mut histogram_b = vec![0.0; last_bucket + 1];
    for offset in offsets_a {
        histogram_a[bucket_of(offset)] += 1.0;
    }
    for offset in offsets_b {
        histogram_b[bucket_of(offset)] += 1.0;
    }
    emd_1d(&histogram_a, &histogram_b)
}

/// EMD over the weekday-by-hour distribution of activity instants
/// (168 bins, week linearized from Monday 00:00).
fn circadian_emd(a: &EventLog, b: &EventLog) -> f64 {
    let histogram = |log: &EventLog| {
        let mut bins = vec![0.0; 7 * 24];
        for record in &log.records {
            for ts in [record.start_time, record.end_time] {
                let bin = ts.weekday().num_days_from_monday() * 24 + ts.hour();
                bins[bin as usize] += 1.0;
            }
        }
        bins
    };
    emd_1d(&histogram(a), &histogram(b))
}

const CYCLE_TIME_BINS: usize = 50;

/// EMD over case durations, binned into equal-width buckets up to the
/// longest observed cycle time across both logs.
fn cycle_time_emd(a: &EventLog, b: &EventLog) -> f64 {
    let cycle_times_a = a.cycle_times_secs();
    let cycle_times_b = b.cycle_times_secs();
    let longest = cycle_times_a
        .iter()
        .chain(&cycle_times_b)
        .fold(0.0f64, |acc, &t| acc.max(t));
    if longest == 0.0 {
        return 0.0;
    }
    let width = longest / CYCLE_TIME_BINS as f64;
    let histogram = |cycle_times: &[f64]| {
        let mut bins = vec![0.0; CYCLE_TIME_BINS];
        for &t in cycle_times {
            let bin = ((t / width) as usize).min(CYCLE_TIME_BINS - 1);
            bins[bin] += 1.0;
        }
        bins
    };
    emd_1d(&histogram(&cycle_times_a), &histogram(&cycle_times_b))
}

/// Normalized activity-sequence edit distance over order-paired traces.
///
/// Traces are sorted by activity sequence and paired by rank; unpaired
/// traces count as maximally distant. Result is in [0, 1].
fn control_flow_log_distance(a: &EventLog, b: &EventLog) -> f64 {
    let sequences = |log: &EventLog| -> Vec<Vec<String>> {
        let mut sequences: Vec<Vec<String>> = log
            .traces()
            .iter()
            .map(|(_, events)| events.iter().map(|e| e.activity.clone()).collect())
            .collect();
        sequences.sort();
        sequences
    };
    let sequences_a = sequences(a);
    let sequences_b = sequences(b);

    let paired = sequences_a.len().min(sequences_b.len());
    let total = sequences_a.len().max(sequences_b.len());
    let mut sum = 0.0;
    for (seq_a, seq_b) in sequences_a.iter().zip(sequences_b.iter()) {
        let longest = seq_a.len().max(seq_b.len());
        if longest == 0 {
            continue;
        }
        sum += levenshtein(seq_a, seq_b) as f64 / longest as f64;
    }
    sum += (total - paired) as f64;
    sum / total as f64
}

fn levenshtein(a: &[String], b: &[String]) -> usize {
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, item_a) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, item_b) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(item_a != item_b);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}
