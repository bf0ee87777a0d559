//! Deterministic training/test partitioning.

use sf_types::{EventLog, EventRecord, SfResult};

/// Split a log into a training partition and an optional held-out test
/// partition.
///
/// Cases are ordered by first start time (ties by case id) and the first
/// `ceil(fraction * n)` cases form the training partition, so repeated runs
/// over the same log always produce the same split. A fraction of 1.0
/// yields no test partition.
pub fn split_training_test(
    log: &EventLog,
    fraction: f64,
) -> SfResult<(EventLog, Option<EventLog>)> {
    let traces = log.traces();
    let case_count = traces.len();
    if case_count == 0 {
        return Ok((log.clone(), None));
    }
    let train_cases = ((fraction * case_count as f64).ceil() as usize).clamp(1, case_count);

    let collect = |slice: &[(String, Vec<&EventRecord>)]| -> Vec<EventRecord> {
        slice
            .iter()
            .flat_map(|(_, events)| events.iter().map(|e| (*e).clone()))
            .collect()
    };

    let training = EventLog::new(log.process_name.clone(), collect(&traces[..train_cases]))?;

    if train_cases == case_count {
        tracing::debug!("Training split keeps all {case_count} cases; no test partition");
        return Ok((training, None));
    }

    let test = EventLog::new(
        format!("{}_test", log.process_name),
        collect(&traces[train_cases..]),
    )?;
    tracing::info!(
        "Split {} cases into {} training and {} test",
        case_count,
        train_cases,
        case_count - train_cases
    );
    Ok((training, Some(test)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn log_with_cases(n: usize) -> EventLog {
        let base = Utc.with_ymd_and_hms(2023, 5, 8, 8, 0, 0).unwrap();
        let records = (0..n)
            .map(|i| {
                let start = base + Duration::hours(i as i64);
                EventRecord::new(
                    format!("c{i}"),
                    "Work",
                    "ann",
                    start,
                    start + Duration::minutes(30),
                )
            })
            .collect();
        EventLog::new("p", records).unwrap()
    }

    #[test]
    fn split_is_deterministic() {
        let log = log_with_cases(10);
        let (train_a, test_a) = split_training_test(&log, 0.8).unwrap();
        let (train_b, test_b) = split_training_test(&log, 0.8).unwrap();
        assert_eq!(train_a, train_b);
        assert_eq!(test_a, test_b);
        assert_eq!(train_a.case_count(), 8);
        assert_eq!(test_a.unwrap().case_count(), 2);
    }

    #[test]
    fn earliest_cases_go_to_training() {
        let log = log_with_cases(4);
        let (train, test) = split_training_test(&log, 0.5).unwrap();
        let train_cases: Vec<_> = train.traces().iter().map(|(id, _)| id.clone()).collect();
        assert_eq!(train_cases, vec!["c0", "c1"]);
        let test_cases: Vec<_> = test.unwrap().traces().iter().map(|(id, _)| id.clone()).collect();
        assert_eq!(test_cases, vec!["c2", "c3"]);
    }

    #[test]
    fn full_fraction_keeps_everything_for_training() {
        let log = log_with_cases(3);
        let (train, test) = split_training_test(&log, 1.0).unwrap();
        assert_eq!(train.case_count(), 3);
        assert!(test.is_none());
    }

    #[test]
    fn at_least_one_training_case() {
        let log = log_with_cases(2);
        let (train, _) = split_training_test(&log, 0.01).unwrap();
        assert_eq!(train.case_count(), 1);
    }
}
