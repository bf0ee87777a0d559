//! Artifacts produced by the pipeline stages: the mined process model,
//! availability calendars, and extraneous-delay parameters.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::{CalendarDiscoveryType, GatewayProbabilitiesMethod};

pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Handle to a mined process model file, together with the gateway
/// probabilities method its simulation parameters were derived with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessModel {
    pub path: PathBuf,
    pub gateway_probabilities: GatewayProbabilitiesMethod,
}

impl ProcessModel {
    pub fn new(path: PathBuf, gateway_probabilities: GatewayProbabilitiesMethod) -> Self {
        Self {
            path,
            gateway_probabilities,
        }
    }
}

/// A weekly availability slot. `weekday` is 0 = Monday .. 6 = Sunday,
/// minutes count from midnight, `end_min` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub weekday: u8,
    pub start_min: u32,
    pub end_min: u32,
}

impl TimeInterval {
    pub fn new(weekday: u8, start_min: u32, end_min: u32) -> Self {
        debug_assert!(weekday < 7 && start_min < end_min && end_min <= MINUTES_PER_DAY);
        Self {
            weekday,
            start_min,
            end_min,
        }
    }

    pub fn contains(&self, weekday: u8, minute_of_day: u32) -> bool {
        self.weekday == weekday && (self.start_min..self.end_min).contains(&minute_of_day)
    }

    pub fn duration_mins(&self) -> u32 {
        self.end_min - self.start_min
    }

    /// Round-the-clock availability for every day of the week.
    pub fn full_week() -> Vec<TimeInterval> {
        (0..7)
            .map(|weekday| TimeInterval::new(weekday, 0, MINUTES_PER_DAY))
            .collect()
    }
}

/// Weekly working schedule of one resource, resource pool, or the case
/// arrival process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCalendar {
    pub owner: String,
    /// Resources covered by this calendar; for an individual calendar this
    /// is just the owner.
    pub members: Vec<String>,
    pub intervals: Vec<TimeInterval>,
}

impl ResourceCalendar {
    pub fn new(owner: impl Into<String>, members: Vec<String>, intervals: Vec<TimeInterval>) -> Self {
        Self {
            owner: owner.into(),
            members,
            intervals,
        }
    }

    pub fn hours_per_week(&self) -> f64 {
        self.intervals
            .iter()
            .map(|i| i.duration_mins() as f64)
            .sum::<f64>()
            / 60.0
    }

    pub fn is_available(&self, weekday: u8, minute_of_day: u32) -> bool {
        self.intervals
            .iter()
            .any(|i| i.contains(weekday, minute_of_day))
    }
}

/// The calendar artifact of stage two: one arrival calendar plus the
/// resource calendars of the chosen discovery type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarSet {
    pub discovery_type: CalendarDiscoveryType,
    pub arrival: ResourceCalendar,
    pub resources: Vec<ResourceCalendar>,
}

impl CalendarSet {
    pub fn calendar_for(&self, resource: &str) -> Option<&ResourceCalendar> {
        self.resources
            .iter()
            .find(|c| c.members.iter().any(|m| m == resource))
    }
}

/// Waiting-time distribution of one activity, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DelayDistribution {
    pub mean_secs: f64,
    pub std_secs: f64,
}

/// The stage-three artifact: per-activity extraneous waiting time not
/// explained by resource or calendar availability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraneousDelays {
    /// Fraction of the observed idle gap attributed to extraneous waiting.
    pub scale: f64,
    pub activities: BTreeMap<String, DelayDistribution>,
}

impl ExtraneousDelays {
    pub fn none() -> Self {
        Self {
            scale: 0.0,
            activities: BTreeMap::new(),
        }
    }
}

/// The opaque artifact handle a trial carries. Only the slots produced by
/// the trial's stage are populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSet {
    pub model: Option<ProcessModel>,
    pub calendars: Option<CalendarSet>,
    pub delays: Option<ExtraneousDelays>,
}

impl ArtifactSet {
    pub fn with_model(model: ProcessModel) -> Self {
        Self {
            model: Some(model),
            ..Self::default()
        }
    }

    pub fn with_calendars(calendars: CalendarSet) -> Self {
        Self {
            calendars: Some(calendars),
            ..Self::default()
        }
    }

    pub fn with_delays(delays: ExtraneousDelays) -> Self {
        Self {
            delays: Some(delays),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_membership() {
        let interval = TimeInterval::new(0, 9 * 60, 17 * 60);
        assert!(interval.contains(0, 9 * 60));
        assert!(interval.contains(0, 16 * 60 + 59));
        assert!(!interval.contains(0, 17 * 60));
        assert!(!interval.contains(1, 10 * 60));
    }

    #[test]
    fn full_week_is_168_hours() {
        let calendar = ResourceCalendar::new("24-7", vec![], TimeInterval::full_week());
        assert_eq!(calendar.hours_per_week(), 168.0);
    }

    #[test]
    fn calendar_lookup_by_member() {
        let set = CalendarSet {
            discovery_type: CalendarDiscoveryType::PerResourcePool,
            arrival: ResourceCalendar::new("arrival", vec![], TimeInterval::full_week()),
            resources: vec![ResourceCalendar::new(
                "pool_0",
                vec!["ann".to_string(), "bob".to_string()],
                vec![TimeInterval::new(0, 540, 1020)],
            )],
        };
        assert!(set.calendar_for("ann").is_some());
        assert!(set.calendar_for("zoe").is_none());
    }
}
