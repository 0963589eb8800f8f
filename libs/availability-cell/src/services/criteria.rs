use std::collections::HashSet;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;

use cache_cell::slot_key;
use shared_models::clinic::PractitionerSchedule;
use shared_utils::time::utc_to_local;

use crate::models::SearchCriteria;

/// The single slot filter shared by every availability path. A slot survives
/// iff it is upcoming and not suppressed by the session's rejections or a
/// recent failed booking attempt.
pub struct SlotFilter {
    now: DateTime<Utc>,
    tz: Tz,
    suppressed: HashSet<String>,
}

impl SlotFilter {
    pub fn new(now: DateTime<Utc>, tz: Tz, suppressed: HashSet<String>) -> Self {
        Self { now, tz, suppressed }
    }

    /// Key identifying a slot for suppression, in clinic-local civil terms.
    pub fn key_for(&self, criteria: &SearchCriteria, starts_at: DateTime<Utc>) -> String {
        let local = utc_to_local(starts_at, self.tz);
        slot_key(
            &criteria.practitioner_id,
            &criteria.business_id,
            local.date_naive(),
            &local.format("%H:%M").to_string(),
        )
    }

    pub fn admits(&self, criteria: &SearchCriteria, starts_at: DateTime<Utc>) -> bool {
        starts_at > self.now && !self.suppressed.contains(&self.key_for(criteria, starts_at))
    }
}

/// Dates within a window on which the practitioner actually works at the
/// business, per the locally stored schedule. An empty schedule means the
/// clinic never loaded working hours; in that case nothing is pruned.
pub fn prune_dates_by_schedule(
    schedules: &[PractitionerSchedule],
    criteria: &SearchCriteria,
    dates: &[NaiveDate],
) -> Vec<NaiveDate> {
    let relevant: Vec<&PractitionerSchedule> = schedules
        .iter()
        .filter(|s| s.business_id == criteria.business_id)
        .collect();

    let any_for_practitioner = schedules
        .iter()
        .any(|s| s.practitioner_id == criteria.practitioner_id);
    if !any_for_practitioner {
        return dates.to_vec();
    }

    dates
        .iter()
        .copied()
        .filter(|date| {
            let weekday = date.weekday().num_days_from_monday() as u8;
            relevant.iter().any(|s| s.covers(*date, weekday))
        })
        .collect()
}

/// Group sorted dates into runs of consecutive days no longer than the PMS
/// window limit (7 days). Each span becomes one upstream call.
pub fn group_into_spans(dates: &[NaiveDate]) -> Vec<(NaiveDate, NaiveDate)> {
    let mut spans = Vec::new();
    let mut iter = dates.iter().copied();
    let Some(mut start) = iter.next() else {
        return spans;
    };
    let mut end = start;

    for date in iter {
        let contiguous = (date - end).num_days() == 1;
        let within_window = (date - start).num_days() < 7;
        if contiguous && within_window {
            end = date;
        } else {
            spans.push((start, end));
            start = date;
            end = date;
        }
    }
    spans.push((start, end));
    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};
    use chrono_tz::Australia::Sydney;
    use shared_models::ids::{BusinessId, PractitionerId, ServiceId};

    fn criteria() -> SearchCriteria {
        SearchCriteria {
            practitioner_id: PractitionerId::new("p1"),
            practitioner_name: "Brendan Smith".to_string(),
            business_id: BusinessId::new("b1"),
            business_name: "City Clinic".to_string(),
            service_id: ServiceId::new("s1"),
            service_name: "Massage".to_string(),
            duration_minutes: 60,
        }
    }

    fn schedule(day: u8, business: &str) -> PractitionerSchedule {
        PractitionerSchedule {
            practitioner_id: PractitionerId::new("p1"),
            business_id: BusinessId::new(business),
            day_of_week: day,
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            effective_from: None,
            effective_to: None,
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn pruning_keeps_only_working_days() {
        // Works Mondays (0) and Wednesdays (2) at b1.
        let schedules = vec![schedule(0, "b1"), schedule(2, "b1")];
        // 2025-07-14 Mon .. 2025-07-20 Sun.
        let week: Vec<NaiveDate> = (14..=20).map(|day| d(2025, 7, day)).collect();

        let kept = prune_dates_by_schedule(&schedules, &criteria(), &week);
        assert_eq!(kept, vec![d(2025, 7, 14), d(2025, 7, 16)]);
    }

    #[test]
    fn pruning_respects_business_assignment() {
        // Works every day, but only at another location.
        let schedules: Vec<PractitionerSchedule> =
            (0..7).map(|day| schedule(day, "b2")).collect();
        let week: Vec<NaiveDate> = (14..=20).map(|day| d(2025, 7, day)).collect();

        let kept = prune_dates_by_schedule(&schedules, &criteria(), &week);
        assert!(kept.is_empty());
    }

    #[test]
    fn missing_schedule_data_prunes_nothing() {
        let week: Vec<NaiveDate> = (14..=16).map(|day| d(2025, 7, day)).collect();
        let kept = prune_dates_by_schedule(&[], &criteria(), &week);
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn spans_cover_fourteen_days_in_two_calls() {
        let dates: Vec<NaiveDate> = (0..14)
            .map(|offset| d(2025, 7, 14) + chrono::Duration::days(offset))
            .collect();
        let spans = group_into_spans(&dates);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0], (d(2025, 7, 14), d(2025, 7, 20)));
        assert_eq!(spans[1], (d(2025, 7, 21), d(2025, 7, 27)));
    }

    #[test]
    fn spans_break_on_gaps() {
        let dates = vec![d(2025, 7, 14), d(2025, 7, 16), d(2025, 7, 17)];
        let spans = group_into_spans(&dates);
        assert_eq!(spans, vec![
            (d(2025, 7, 14), d(2025, 7, 14)),
            (d(2025, 7, 16), d(2025, 7, 17)),
        ]);
    }

    #[test]
    fn filter_admits_future_unsuppressed_slots_only() {
        let now = Sydney
            .with_ymd_and_hms(2025, 7, 16, 8, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let criteria = criteria();

        let morning = Sydney
            .with_ymd_and_hms(2025, 7, 16, 10, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let past = Sydney
            .with_ymd_and_hms(2025, 7, 16, 7, 0, 0)
            .unwrap()
            .with_timezone(&Utc);

        let empty = SlotFilter::new(now, Sydney, HashSet::new());
        assert!(empty.admits(&criteria, morning));
        assert!(!empty.admits(&criteria, past));

        let mut suppressed = HashSet::new();
        suppressed.insert(empty.key_for(&criteria, morning));
        let filter = SlotFilter::new(now, Sydney, suppressed);
        assert!(!filter.admits(&criteria, morning));
    }
}
