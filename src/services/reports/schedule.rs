//! Due-time matching for report schedules.
//!
//! A schedule is due during one local clock hour (its slot). The scheduler polls several times
//! per hour, so firing is made exactly-once by claiming the slot: `last_triggered_at` may only
//! move forward past the slot start once.

use crate::models::{Frequency, ReportSchedule};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;

pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Asia::Seoul;

pub fn schedule_timezone(name: &str) -> Tz {
    name.parse::<Tz>().unwrap_or_else(|_| {
        tracing::warn!("Unknown schedule timezone '{}', using {}", name, DEFAULT_TIMEZONE);
        DEFAULT_TIMEZONE
    })
}

pub fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

/// A requested day past the end of the month fires on the month's last day.
pub fn effective_day_of_month(requested: i32, year: i32, month: u32) -> u32 {
    let last = last_day_of_month(year, month);
    (requested.max(1) as u32).min(last)
}

pub fn is_due(schedule: &ReportSchedule, now: DateTime<Utc>) -> bool {
    if !schedule.is_active {
        return false;
    }

    let local = now.with_timezone(&schedule_timezone(&schedule.timezone));
    if local.hour() != schedule.time_of_day.hour() {
        return false;
    }

    match schedule.frequency() {
        Frequency::Daily => true,
        Frequency::Weekly => schedule
            .day_of_week
            .is_some_and(|day| local.weekday().num_days_from_monday() as i32 == day),
        Frequency::Monthly => schedule.day_of_month.is_some_and(|day| {
            local.day() == effective_day_of_month(day, local.year(), local.month())
        }),
        Frequency::Disabled => false,
    }
}

/// Calendar date at the schedule's location. Report periods count back from this day.
pub fn local_today(schedule: &ReportSchedule, now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&schedule_timezone(&schedule.timezone)).date_naive()
}

/// Start of the local hour containing `now`, as a UTC instant.
pub fn slot_start(schedule: &ReportSchedule, now: DateTime<Utc>) -> DateTime<Utc> {
    let local = now.with_timezone(&schedule_timezone(&schedule.timezone));
    now - Duration::seconds(i64::from(local.minute()) * 60 + i64::from(local.second()))
        - Duration::nanoseconds(i64::from(local.nanosecond()))
}

/// Whether a claim for the slot starting at `slot` would succeed.
pub fn slot_unclaimed(last_triggered_at: Option<DateTime<Utc>>, slot: DateTime<Utc>) -> bool {
    last_triggered_at.map_or(true, |last| last < slot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::reports::period::{period_for, ReportType};
    use chrono::{NaiveTime, TimeZone};

    fn schedule(frequency: &str, day_of_week: Option<i32>, day_of_month: Option<i32>) -> ReportSchedule {
        let now = Utc::now();
        ReportSchedule {
            id: 1,
            tenant_id: 1,
            frequency: frequency.to_string(),
            day_of_week,
            day_of_month,
            time_of_day: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            timezone: "Asia/Seoul".to_string(),
            campaign_ids: None,
            is_active: true,
            last_triggered_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_weekly_monday_nine_seoul_fires_exactly_once() {
        let mut s = schedule("weekly", Some(0), None);
        let mut fired = 0;

        // Sunday 2024-01-07 23:00 UTC through Monday 02:00 UTC, polled every 5 minutes.
        // Monday 09:00 KST is Monday 00:00 UTC.
        let mut now = utc(2024, 1, 7, 23, 0);
        let end = utc(2024, 1, 8, 2, 0);
        while now < end {
            if is_due(&s, now) {
                let slot = slot_start(&s, now);
                if slot_unclaimed(s.last_triggered_at, slot) {
                    s.last_triggered_at = Some(now);
                    fired += 1;
                    assert_eq!(slot, utc(2024, 1, 8, 0, 0));
                }
            }
            now += Duration::minutes(5);
        }

        assert_eq!(fired, 1);
    }

    #[test]
    fn test_weekly_respects_timezone() {
        let s = schedule("weekly", Some(0), None);

        // Monday 09:30 UTC is Monday 18:30 KST
        assert!(!is_due(&s, utc(2024, 1, 8, 9, 30)));
        // Sunday 00:30 UTC is Sunday 09:30 KST
        assert!(!is_due(&s, utc(2024, 1, 7, 0, 30)));
        assert!(is_due(&s, utc(2024, 1, 8, 0, 30)));
    }

    #[test]
    fn test_early_morning_seoul_schedule_reports_local_last_week() {
        let mut s = schedule("weekly", Some(0), None);
        s.time_of_day = NaiveTime::from_hms_opt(8, 0, 0).unwrap();

        // Sunday 23:30 UTC is Monday 08:30 KST
        let now = utc(2024, 1, 7, 23, 30);
        assert!(is_due(&s, now));

        let today = local_today(&s, now);
        assert_eq!(today, NaiveDate::from_ymd_opt(2024, 1, 8).unwrap());

        let period = period_for(ReportType::Weekly, today);
        assert_eq!(period.start, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(period.end, NaiveDate::from_ymd_opt(2024, 1, 7).unwrap());

        let daily = period_for(ReportType::Daily, today);
        assert_eq!(daily.start, NaiveDate::from_ymd_opt(2024, 1, 7).unwrap());
    }

    #[test]
    fn test_daily_matches_hour_only() {
        let s = schedule("daily", None, None);
        assert!(is_due(&s, utc(2024, 3, 5, 0, 59)));
        assert!(!is_due(&s, utc(2024, 3, 5, 1, 0)));
    }

    #[test]
    fn test_monthly_clamps_to_last_day() {
        let s = schedule("monthly", None, Some(31));

        // 2024-02-29 09:10 KST
        assert!(is_due(&s, utc(2024, 2, 29, 0, 10)));
        // 2024-02-28 09:10 KST
        assert!(!is_due(&s, utc(2024, 2, 28, 0, 10)));
        // 2024-03-31 09:10 KST
        assert!(is_due(&s, utc(2024, 3, 31, 0, 10)));
    }

    #[test]
    fn test_disabled_and_inactive_never_fire() {
        let disabled = schedule("disabled", Some(0), None);
        assert!(!is_due(&disabled, utc(2024, 1, 8, 0, 0)));

        let mut inactive = schedule("daily", None, None);
        inactive.is_active = false;
        assert!(!is_due(&inactive, utc(2024, 1, 8, 0, 0)));
    }

    #[test]
    fn test_invalid_timezone_falls_back_to_seoul() {
        let mut s = schedule("daily", None, None);
        s.timezone = "Mars/Olympus".to_string();
        assert!(is_due(&s, utc(2024, 1, 8, 0, 15)));
    }

    #[test]
    fn test_slot_start_half_hour_offset() {
        let mut s = schedule("daily", None, None);
        s.timezone = "Asia/Kolkata".to_string();

        // 03:40 UTC is 09:10 IST; the slot opened at 09:00 IST = 03:30 UTC
        assert_eq!(slot_start(&s, utc(2024, 1, 8, 3, 40)), utc(2024, 1, 8, 3, 30));
    }

    #[test]
    fn test_next_week_fires_again() {
        let s = schedule("weekly", Some(0), None);
        let first = utc(2024, 1, 8, 0, 5);
        let next = utc(2024, 1, 15, 0, 5);

        let slot = slot_start(&s, next);
        assert!(slot_unclaimed(Some(first), slot));
        assert!(!slot_unclaimed(Some(first), slot_start(&s, first)));
    }

    #[test]
    fn test_last_day_of_month() {
        assert_eq!(last_day_of_month(2024, 2), 29);
        assert_eq!(last_day_of_month(2023, 2), 28);
        assert_eq!(last_day_of_month(2024, 12), 31);
        assert_eq!(effective_day_of_month(0, 2024, 4), 1);
    }
}
