//! In-memory event log: ordered case records of timestamped
//! activity-resource events.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{LogError, SfResult};

/// One executed activity instance within a case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub case_id: String,
    pub activity: String,
    pub resource: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl EventRecord {
    pub fn new(
        case_id: impl Into<String>,
        activity: impl Into<String>,
        resource: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            case_id: case_id.into(),
            activity: activity.into(),
            resource: resource.into(),
            start_time,
            end_time,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        (self.end_time - self.start_time).num_milliseconds() as f64 / 1000.0
    }
}

/// An ordered sequence of case records. Read once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLog {
    pub process_name: String,
    pub records: Vec<EventRecord>,
}

impl EventLog {
    /// Build a log, rejecting records that end before they start.
    pub fn new(process_name: impl Into<String>, records: Vec<EventRecord>) -> SfResult<Self> {
        for (row, record) in records.iter().enumerate() {
            if record.start_time > record.end_time {
                return Err(LogError::StartAfterEnd {
                    case_id: record.case_id.clone(),
                    row,
                }
                .into());
            }
        }
        Ok(Self {
            process_name: process_name.into(),
            records,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Case traces, events inside each trace ordered by start time, traces
    /// ordered by first start time (ties by case id). This ordering is the
    /// basis of the deterministic training/test split.
    pub fn traces(&self) -> Vec<(String, Vec<&EventRecord>)> {
        let mut by_case: Vec<(String, Vec<&EventRecord>)> = Vec::new();
        for record in &self.records {
            match by_case.iter_mut().find(|(id, _)| *id == record.case_id) {
                Some((_, events)) => events.push(record),
                None => by_case.push((record.case_id.clone(), vec![record])),
            }
        }
        for (_, events) in by_case.iter_mut() {
            events.sort_by_key(|e| (e.start_time, e.end_time));
        }
        by_case.sort_by(|(id_a, a), (id_b, b)| {
            let start_a = a.first().map(|e| e.start_time);
            let start_b = b.first().map(|e| e.start_time);
            start_a.cmp(&start_b).then_with(|| id_a.cmp(id_b))
        });
        by_case
    }

    pub fn case_count(&self) -> usize {
        self.traces().len()
    }

    pub fn activities(&self) -> BTreeSet<String> {
        self.records.iter().map(|r| r.activity.clone()).collect()
    }

    pub fn resources(&self) -> BTreeSet<String> {
        self.records.iter().map(|r| r.resource.clone()).collect()
    }

    /// Earliest start and latest end across the whole log.
    pub fn span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let first = self.records.iter().map(|r| r.start_time).min()?;
        let last = self.records.iter().map(|r| r.end_time).max()?;
        Some((first, last))
    }

    /// End-to-end duration of each case in seconds, in trace order.
    pub fn cycle_times_secs(&self) -> Vec<f64> {
        self.traces()
            .iter()
            .filter_map(|(_, events)| {
                let start = events.first()?.start_time;
                let end = events.iter().map(|e| e.end_time).max()?;
                Some((end - start).num_milliseconds() as f64 / 1000.0)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 5, 8, h, m, 0).unwrap()
    }

    fn sample_log() -> EventLog {
        EventLog::new(
            "claims",
            vec![
                EventRecord::new("c2", "Review", "ann", ts(10, 0), ts(11, 0)),
                EventRecord::new("c1", "Submit", "bob", ts(9, 0), ts(9, 30)),
                EventRecord::new("c1", "Review", "ann", ts(9, 45), ts(10, 30)),
                EventRecord::new("c2", "Submit", "bob", ts(9, 15), ts(9, 50)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn traces_ordered_by_first_start() {
        let log = sample_log();
        let traces = log.traces();
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[0].0, "c1");
        assert_eq!(traces[1].0, "c2");
        // Events inside a trace are start-ordered.
        assert_eq!(traces[1].1[0].activity, "Submit");
        assert_eq!(traces[1].1[1].activity, "Review");
    }

    #[test]
    fn rejects_inverted_timestamps() {
        let result = EventLog::new(
            "bad",
            vec![EventRecord::new("c1", "A", "r1", ts(10, 0), ts(9, 0))],
        );
        assert!(result.is_err());
    }

    #[test]
    fn cycle_times() {
        let log = sample_log();
        let cycle_times = log.cycle_times_secs();
        // c1: 9:00 -> 10:30, c2: 9:15 -> 11:00
        assert_eq!(cycle_times, vec![5400.0, 6300.0]);
    }

    #[test]
    fn activities_and_resources_sorted() {
        let log = sample_log();
        let activities: Vec<_> = log.activities().into_iter().collect();
        assert_eq!(activities, vec!["Review".to_string(), "Submit".to_string()]);
        assert_eq!(log.resources().len(), 2);
    }
}
