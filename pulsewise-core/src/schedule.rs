//! Schedule calculation
//!
//! Computes when an instance next runs. Recurring cadences land on 09:00
//! local time in the schedule's IANA timezone; the result is stored in UTC.

use crate::error::{Error, Result};
use crate::types::{AgentSchedule, Cadence, ScheduleSpec};
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Local hour recurring runs fire at.
pub const RUN_HOUR: i64 = 9;

/// Parse an IANA timezone name.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| Error::validation("timezone", format!("unknown timezone: {name}")))
}

/// Next trigger time for `cadence`, computed from `from` in `tz`.
///
/// | Cadence | Next run |
/// |---------|----------|
/// | once | `from` + 1 hour |
/// | daily | next local day, 09:00 |
/// | weekly | next Monday, 09:00 (a Monday moves a full week ahead) |
/// | biweekly | local date + 14 days, 09:00 |
/// | monthly | 1st of next local month, 09:00 |
pub fn next_run(cadence: Cadence, from: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    if cadence == Cadence::Once {
        return from + Duration::hours(1);
    }

    let today = from.with_timezone(&tz).date_naive();
    let date = match cadence {
        Cadence::Once => today,
        Cadence::Daily => today + Duration::days(1),
        Cadence::Weekly => {
            // Sunday = 0; a result of 0 would be today, so it becomes 7
            let dow = today.weekday().num_days_from_sunday() as i64;
            let days = match (8 - dow) % 7 {
                0 => 7,
                n => n,
            };
            today + Duration::days(days)
        }
        Cadence::Biweekly => today + Duration::days(14),
        Cadence::Monthly => first_of_next_month(today),
    };

    local_to_utc(tz, date.and_time(NaiveTime::default()) + Duration::hours(RUN_HOUR))
}

fn first_of_next_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1)
        .and_then(|d| d.checked_add_months(Months::new(1)))
        .unwrap_or(date + Duration::days(31))
}

/// Map a local wall-clock time to UTC.
///
/// Ambiguous times (DST fall-back) take the earlier instant. Times inside a
/// DST gap move forward to the first valid quarter hour after it.
fn local_to_utc(tz: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    let mut candidate = local;
    for _ in 0..16 {
        if let Some(dt) = tz.from_local_datetime(&candidate).earliest() {
            return dt.with_timezone(&Utc);
        }
        candidate += Duration::minutes(15);
    }
    Utc.from_utc_datetime(&local)
}

/// Whether a schedule should run at `now`.
pub fn is_due(schedule: &AgentSchedule, now: DateTime<Utc>) -> bool {
    schedule.is_active && schedule.next_run_at <= now
}

/// The schedule row for a freshly created instance.
pub fn plan(
    company_id: &str,
    instance_id: &str,
    spec: &ScheduleSpec,
    now: DateTime<Utc>,
) -> Result<AgentSchedule> {
    let tz = parse_timezone(&spec.timezone)?;
    Ok(AgentSchedule {
        agent_instance_id: instance_id.to_string(),
        company_id: company_id.to_string(),
        cadence: spec.cadence,
        timezone: spec.timezone.clone(),
        next_run_at: next_run(spec.cadence, now, tz),
        last_run_at: None,
        is_active: true,
    })
}

/// The schedule after a run at `now`: recurring cadences advance, `once`
/// deactivates.
pub fn after_run(schedule: &AgentSchedule, now: DateTime<Utc>) -> Result<AgentSchedule> {
    let tz = parse_timezone(&schedule.timezone)?;
    Ok(AgentSchedule {
        next_run_at: next_run(schedule.cadence, now, tz),
        last_run_at: Some(now),
        is_active: schedule.is_active && schedule.cadence != Cadence::Once,
        ..schedule.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_weekly_from_monday_skips_full_week() {
        // 2025-01-06 is a Monday
        let next = next_run(Cadence::Weekly, utc("2025-01-06T10:00:00Z"), chrono_tz::UTC);
        assert_eq!(next, utc("2025-01-13T09:00:00Z"));

        // Before 09:00 on a Monday still moves a full week
        let early = next_run(Cadence::Weekly, utc("2025-01-06T06:00:00Z"), chrono_tz::UTC);
        assert_eq!(early, utc("2025-01-13T09:00:00Z"));
    }

    #[test]
    fn test_weekly_from_other_days() {
        // Sunday -> next day
        let sunday = next_run(Cadence::Weekly, utc("2025-01-05T12:00:00Z"), chrono_tz::UTC);
        assert_eq!(sunday, utc("2025-01-06T09:00:00Z"));

        // Wednesday -> following Monday
        let wednesday = next_run(Cadence::Weekly, utc("2025-01-08T12:00:00Z"), chrono_tz::UTC);
        assert_eq!(wednesday, utc("2025-01-13T09:00:00Z"));
    }

    #[test]
    fn test_weekly_uses_local_weekday() {
        // Monday 01:00 UTC is still Sunday evening in New York
        let tz = parse_timezone("America/New_York").unwrap();
        let next = next_run(Cadence::Weekly, utc("2025-01-06T01:00:00Z"), tz);
        // Monday 09:00 EST
        assert_eq!(next, utc("2025-01-06T14:00:00Z"));
    }

    #[test]
    fn test_once_defers_one_hour() {
        let from = utc("2025-01-06T10:17:00Z");
        assert_eq!(next_run(Cadence::Once, from, chrono_tz::UTC), utc("2025-01-06T11:17:00Z"));
    }

    #[test]
    fn test_daily_across_dst_start() {
        let tz = parse_timezone("America/New_York").unwrap();
        // Saturday before DST starts; Sunday 09:00 is EDT (UTC-4)
        let next = next_run(Cadence::Daily, utc("2025-03-08T15:00:00Z"), tz);
        assert_eq!(next, utc("2025-03-09T13:00:00Z"));
    }

    #[test]
    fn test_biweekly_and_monthly() {
        let from = utc("2025-12-20T08:00:00Z");
        assert_eq!(
            next_run(Cadence::Biweekly, from, chrono_tz::UTC),
            utc("2026-01-03T09:00:00Z")
        );
        assert_eq!(
            next_run(Cadence::Monthly, from, chrono_tz::UTC),
            utc("2026-01-01T09:00:00Z")
        );
        assert_eq!(
            next_run(Cadence::Monthly, utc("2025-01-31T12:00:00Z"), chrono_tz::UTC),
            utc("2025-02-01T09:00:00Z")
        );
    }

    #[test]
    fn test_gap_time_moves_forward() {
        let tz = parse_timezone("America/New_York").unwrap();
        let in_gap = NaiveDate::from_ymd_opt(2025, 3, 9)
            .unwrap()
            .and_hms_opt(2, 30, 0)
            .unwrap();
        // 03:00 EDT
        assert_eq!(local_to_utc(tz, in_gap), utc("2025-03-09T07:00:00Z"));
    }

    #[test]
    fn test_unknown_timezone_is_validation_error() {
        let err = parse_timezone("Mars/Olympus_Mons").unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "timezone"));
    }

    #[test]
    fn test_once_deactivates_after_run() {
        let now = utc("2025-01-06T10:00:00Z");
        let spec = ScheduleSpec {
            cadence: Cadence::Once,
            timezone: "UTC".to_string(),
        };
        let schedule = plan("acme", "inst-1", &spec, now).unwrap();
        assert!(!is_due(&schedule, now));
        assert!(is_due(&schedule, now + Duration::hours(1)));

        let after = after_run(&schedule, now + Duration::hours(1)).unwrap();
        assert!(!after.is_active);
        assert_eq!(after.last_run_at, Some(now + Duration::hours(1)));
        assert!(!is_due(&after, now + Duration::days(30)));
    }
}
