//! Calendar-discovery collaborator: weekly availability calendars derived
//! from the instants at which resources were observed working.

use std::collections::BTreeMap;

use chrono::{Datelike, Timelike};
use sf_types::{
    CalendarDiscoveryType, CalendarSet, CollaboratorError, EventLog, ProcessModel,
    ResourceCalendar, SfResult, TimeInterval,
};

/// Parameters of one calendar-discovery invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarParams {
    pub discovery_type: CalendarDiscoveryType,
    /// Slot size of the weekly grid, in minutes.
    pub granularity_minutes: u32,
    /// A slot must reach this fraction of the busiest slot's count.
    pub confidence: f64,
    /// A slot must cover this fraction of the owner's observations.
    pub support: f64,
    /// An owner below this share of all observations falls back to the
    /// undifferentiated calendar.
    pub participation: f64,
}

/// Derives availability calendars for an event log against a frozen model.
pub trait CalendarDiscovery: Send + Sync {
    fn discover(
        &self,
        log: &EventLog,
        model: &ProcessModel,
        params: &CalendarParams,
    ) -> SfResult<CalendarSet>;
}

/// (weekday, minute-of-day) of an observed activity instant.
type Instant = (u8, u32);

fn instant_of(ts: &chrono::DateTime<chrono::Utc>) -> Instant {
    (
        ts.weekday().num_days_from_monday() as u8,
        ts.hour() * 60 + ts.minute(),
    )
}

/// Histogram-based weekly calendar discovery.
///
/// Each record contributes its start and end instant to the owner's
/// weekday/slot histogram. A slot is kept when its count reaches both the
/// confidence fraction of the busiest slot and the support fraction of the
/// owner's observations; kept slots merge into weekly intervals. An owner
/// whose histogram keeps no slot gets round-the-clock availability so the
/// simulator can always schedule work.
pub struct WeeklyCalendarDiscovery;

impl WeeklyCalendarDiscovery {
    fn build_intervals(instants: &[Instant], params: &CalendarParams) -> Vec<TimeInterval> {
        let granularity = params.granularity_minutes;
        let mut counts: BTreeMap<(u8, u32), usize> = BTreeMap::new();
        for (weekday, minute) in instants {
            *counts.entry((*weekday, minute / granularity)).or_default() += 1;
        }

        let max_count = counts.values().copied().max().unwrap_or(0);
        if max_count == 0 {
            return TimeInterval::full_week();
        }
        let threshold = (params.confidence * max_count as f64)
            .max(params.support * instants.len() as f64);

        let mut intervals: Vec<TimeInterval> = Vec::new();
        for ((weekday, slot), count) in &counts {
            if (*count as f64) < threshold {
                continue;
            }
            let start_min = slot * granularity;
            let end_min = start_min + granularity;
            match intervals.last_mut() {
                // Merge with the previous slot when contiguous on the same day.
                Some(last) if last.weekday == *weekday && last.end_min == start_min => {
                    last.end_min = end_min;
                }
                _ => intervals.push(TimeInterval::new(*weekday, start_min, end_min)),
            }
        }

        if intervals.is_empty() {
            TimeInterval::full_week()
        } else {
            intervals
        }
    }

    fn instants_by_resource(log: &EventLog) -> BTreeMap<String, Vec<Instant>> {
        let mut by_resource: BTreeMap<String, Vec<Instant>> = BTreeMap::new();
        for record in &log.records {
            let instants = by_resource.entry(record.resource.clone()).or_default();
            instants.push(instant_of(&record.start_time));
            instants.push(instant_of(&record.end_time));
        }
        by_resource
    }

    fn arrival_calendar(log: &EventLog, params: &CalendarParams) -> ResourceCalendar {
        let arrivals: Vec<Instant> = log
            .traces()
            .iter()
            .filter_map(|(_, events)| events.first().map(|e| instant_of(&e.start_time)))
            .collect();
        ResourceCalendar::new(
            "case_arrival",
            Vec::new(),
            Self::build_intervals(&arrivals, params),
        )
    }

    /// Resources grouped by shared activity profile: resources performing
    /// the same activity set belong to the same pool.
    fn pools(log: &EventLog) -> BTreeMap<Vec<String>, Vec<String>> {
        let mut profile: BTreeMap<String, std::collections::BTreeSet<String>> = BTreeMap::new();
        for record in &log.records {
            profile
                .entry(record.resource.clone())
                .or_default()
                .insert(record.activity.clone());
        }
        let mut pools: BTreeMap<Vec<String>, Vec<String>> = BTreeMap::new();
        for (resource, activities) in profile {
            pools
                .entry(activities.into_iter().collect())
                .or_default()
                .push(resource);
        }
        pools
    }
}

impl CalendarDiscovery for WeeklyCalendarDiscovery {
    fn discover(
        &self,
        log: &EventLog,
        _model: &ProcessModel,
        params: &CalendarParams,
    ) -> SfResult<CalendarSet> {
        if log.is_empty() {
            return Err(CollaboratorError::MalformedOutput {
                tool: "calendar-discovery".to_string(),
                message: "cannot discover calendars from an empty log".to_string(),
            }
            .into());
        }

        let by_resource = Self::instants_by_resource(log);
        let all_instants: Vec<Instant> = by_resource.values().flatten().copied().collect();
        let total_observations = all_instants.len();
        let all_resources: Vec<String> = by_resource.keys().cloned().collect();

        let mut resources: Vec<ResourceCalendar> = Vec::new();
        match params.discovery_type {
            CalendarDiscoveryType::Undifferentiated => {
                resources.push(ResourceCalendar::new(
                    "undifferentiated",
                    all_resources,
                    Self::build_intervals(&all_instants, params),
                ));
            }
            CalendarDiscoveryType::PerResource => {
                let mut fallback_members: Vec<String> = Vec::new();
                for (resource, instants) in &by_resource {
                    let share = instants.len() as f64 / total_observations as f64;
                    if share >= params.participation {
                        resources.push(ResourceCalendar::new(
                            resource.clone(),
                            vec![resource.clone()],
                            Self::build_intervals(instants, params),
                        ));
                    } else {
                        fallback_members.push(resource.clone());
                    }
                }
                if !fallback_members.is_empty() {
                    resources.push(ResourceCalendar::new(
                        "undifferentiated",
                        fallback_members,
                        Self::build_intervals(&all_instants, params),
                    ));
                }
            }
            CalendarDiscoveryType::PerResourcePool => {
                let mut fallback_members: Vec<String> = Vec::new();
                for (pool_index, (_, members)) in Self::pools(log).into_iter().enumerate() {
                    let instants: Vec<Instant> = members
                        .iter()
                        .filter_map(|m| by_resource.get(m))
                        .flatten()
                        .copied()
                        .collect();
                    let share = instants.len() as f64 / total_observations as f64;
                    if share >= params.participation {
                        resources.push(ResourceCalendar::new(
                            format!("pool_{pool_index}"),
                            members,
                            Self::build_intervals(&instants, params),
                        ));
                    } else {
                        fallback_members.extend(members);
                    }
                }
                if !fallback_members.is_empty() {
                    resources.push(ResourceCalendar::new(
                        "undifferentiated",
                        fallback_members,
                        Self::build_intervals(&all_instants, params),
                    ));
                }
            }
        }

        tracing::debug!(
            "Discovered {} resource calendars ({}) at {}-minute granularity",
            resources.len(),
            params.discovery_type,
            params.granularity_minutes
        );

        Ok(CalendarSet {
            discovery_type: params.discovery_type,
            arrival: Self::arrival_calendar(log, params),
            resources,
        })
    }
}

/// Round-the-clock calendars for every resource in the log, used to
/// simulate control-flow candidates before calendars are searched.
pub fn always_available(log: &EventLog) -> CalendarSet {
    CalendarSet {
        discovery_type: CalendarDiscoveryType::Undifferentiated,
        arrival: ResourceCalendar::new("case_arrival", Vec::new(), TimeInterval::full_week()),
        resources: vec![ResourceCalendar::new(
            "undifferentiated",
            log.resources().into_iter().collect(),
            TimeInterval::full_week(),
        )],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use sf_types::{EventRecord, GatewayProbabilitiesMethod};
    use std::path::PathBuf;

    fn dummy_model() -> ProcessModel {
        ProcessModel::new(
            PathBuf::from("/tmp/model.bpmn"),
            GatewayProbabilitiesMethod::Discovery,
        )
    }

    fn params(discovery_type: CalendarDiscoveryType) -> CalendarParams {
        CalendarParams {
            discovery_type,
            granularity_minutes: 60,
            confidence: 0.1,
            support: 0.05,
            participation: 0.3,
        }
    }

    /// Two weeks of 9-17 weekday work for ann and bob.
    fn office_hours_log() -> EventLog {
        let mut records = Vec::new();
        // 2023-05-01 is a Monday.
        for week in 0..2 {
            for day in 0..5 {
                for (i, resource) in ["ann", "bob"].iter().enumerate() {
                    let start = Utc
                        .with_ymd_and_hms(2023, 5, 1 + week * 7 + day, 9 + i as u32, 0, 0)
                        .unwrap();
                    records.push(EventRecord::new(
                        format!("c{week}{day}{i}"),
                        "Review",
                        *resource,
                        start,
                        start + Duration::hours(6),
                    ));
                }
            }
        }
        EventLog::new("office", records).unwrap()
    }

    #[test]
    fn undifferentiated_calendar_covers_all_resources() {
        let log = office_hours_log();
        let set = WeeklyCalendarDiscovery
            .discover(&log, &dummy_model(), &params(CalendarDiscoveryType::Undifferentiated))
            .unwrap();
        assert_eq!(set.resources.len(), 1);
        let calendar = &set.resources[0];
        assert_eq!(calendar.members.len(), 2);
        // Working instants all fall on weekdays.
        for interval in &calendar.intervals {
            assert!(interval.weekday < 5, "weekend slot kept: {interval:?}");
        }
        assert!(set.calendar_for("ann").is_some());
        assert!(set.calendar_for("bob").is_some());
    }

    #[test]
    fn per_resource_discovery_gives_individual_calendars() {
        let log = office_hours_log();
        let set = WeeklyCalendarDiscovery
            .discover(&log, &dummy_model(), &params(CalendarDiscoveryType::PerResource))
            .unwrap();
        assert_eq!(set.resources.len(), 2);
        let ann = set.calendar_for("ann").unwrap();
        // ann starts at 9:00 and ends at 15:00.
        assert!(ann.intervals.iter().all(|i| i.start_min >= 9 * 60));
        assert!(ann.intervals.iter().all(|i| i.end_min <= 16 * 60));
    }

    #[test]
    fn low_participation_resource_falls_back_to_shared_calendar() {
        let mut log = office_hours_log();
        let start = Utc.with_ymd_and_hms(2023, 5, 6, 22, 0, 0).unwrap();
        log.records.push(EventRecord::new(
            "c_night",
            "Audit",
            "zoe",
            start,
            start + Duration::hours(1),
        ));
        let set = WeeklyCalendarDiscovery
            .discover(&log, &dummy_model(), &params(CalendarDiscoveryType::PerResource))
            .unwrap();
        let zoe = set.calendar_for("zoe").unwrap();
        assert_eq!(zoe.owner, "undifferentiated");
    }

    #[test]
    fn pool_discovery_groups_by_activity_profile() {
        let log = office_hours_log();
        let mut p = params(CalendarDiscoveryType::PerResourcePool);
        p.participation = 0.0;
        let set = WeeklyCalendarDiscovery
            .discover(&log, &dummy_model(), &p)
            .unwrap();
        // ann and bob both perform only "Review": one pool.
        assert_eq!(set.resources.len(), 1);
        assert_eq!(set.resources[0].members.len(), 2);
        assert!(set.resources[0].owner.starts_with("pool_"));
    }

    #[test]
    fn unreachable_support_falls_back_to_full_week() {
        let log = office_hours_log();
        let mut p = params(CalendarDiscoveryType::Undifferentiated);
        p.support = 0.99;
        let set = WeeklyCalendarDiscovery
            .discover(&log, &dummy_model(), &p)
            .unwrap();
        assert_eq!(set.resources[0].hours_per_week(), 168.0);
    }

    #[test]
    fn contiguous_slots_merge_into_one_interval() {
        let instants: Vec<Instant> = vec![(0, 9 * 60), (0, 10 * 60), (0, 11 * 60)];
        let intervals = WeeklyCalendarDiscovery::build_intervals(
            &instants,
            &params(CalendarDiscoveryType::Undifferentiated),
        );
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].start_min, 9 * 60);
        assert_eq!(intervals[0].end_min, 12 * 60);
    }

    #[test]
    fn discovery_is_deterministic() {
        let log = office_hours_log();
        let p = params(CalendarDiscoveryType::PerResource);
        let a = WeeklyCalendarDiscovery.discover(&log, &dummy_model(), &p).unwrap();
        let b = WeeklyCalendarDiscovery.discover(&log, &dummy_model(), &p).unwrap();
        assert_eq!(a, b);
    }
}
