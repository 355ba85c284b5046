use crate::models::Frequency;
use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    Daily,
    Weekly,
    Monthly,
    Custom,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::Daily => "daily",
            ReportType::Weekly => "weekly",
            ReportType::Monthly => "monthly",
            ReportType::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<ReportType> {
        match s.to_lowercase().as_str() {
            "daily" => Some(ReportType::Daily),
            "weekly" => Some(ReportType::Weekly),
            "monthly" => Some(ReportType::Monthly),
            "custom" => Some(ReportType::Custom),
            _ => None,
        }
    }

    pub fn from_frequency(frequency: Frequency) -> Option<ReportType> {
        match frequency {
            Frequency::Daily => Some(ReportType::Daily),
            Frequency::Weekly => Some(ReportType::Weekly),
            Frequency::Monthly => Some(ReportType::Monthly),
            Frequency::Disabled => None,
        }
    }
}

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ReportPeriod {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self { start: end, end: start }
        }
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// The period the report is compared against.
    pub fn previous(&self, report_type: ReportType) -> ReportPeriod {
        match report_type {
            ReportType::Monthly => {
                let end = first_of_month(self.start) - Duration::days(1);
                ReportPeriod::new(first_of_month(end), end)
            }
            _ => {
                let length = Duration::days(self.days());
                ReportPeriod::new(self.start - length, self.end - length)
            }
        }
    }
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Daily covers yesterday, weekly last Monday..Sunday, monthly the previous calendar month.
pub fn period_for(report_type: ReportType, today: NaiveDate) -> ReportPeriod {
    let yesterday = today - Duration::days(1);
    match report_type {
        ReportType::Daily | ReportType::Custom => ReportPeriod::new(yesterday, yesterday),
        ReportType::Weekly => {
            let days_since_monday = i64::from(today.weekday().num_days_from_monday());
            let last_sunday = today - Duration::days(days_since_monday + 1);
            ReportPeriod::new(last_sunday - Duration::days(6), last_sunday)
        }
        ReportType::Monthly => {
            let end = first_of_month(today) - Duration::days(1);
            ReportPeriod::new(first_of_month(end), end)
        }
    }
}

/// Resolves phrases such as `last_7_days`; unknown phrases mean the last seven days before today.
pub fn named_range(name: &str, today: NaiveDate) -> ReportPeriod {
    let days = Duration::days;
    match name.trim().to_lowercase().as_str() {
        "yesterday" | "last_day" => ReportPeriod::new(today - days(1), today - days(1)),
        "last_week" | "past_week" => ReportPeriod::new(today - days(7), today - days(1)),
        "this_week" | "current_week" => {
            let since_monday = i64::from(today.weekday().num_days_from_monday());
            ReportPeriod::new(today - days(since_monday), today)
        }
        "last_month" | "past_month" => ReportPeriod::new(today - days(30), today - days(1)),
        "this_month" | "current_month" => ReportPeriod::new(first_of_month(today), today),
        "last_7_days" | "past_7_days" => ReportPeriod::new(today - days(7), today),
        "last_30_days" | "past_30_days" => ReportPeriod::new(today - days(30), today),
        other => {
            tracing::warn!("Unknown time period '{}', using last_week", other);
            ReportPeriod::new(today - days(7), today - days(1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_weekly_period_is_last_monday_to_sunday() {
        // Wednesday
        let period = period_for(ReportType::Weekly, date(2024, 1, 10));
        assert_eq!(period, ReportPeriod::new(date(2024, 1, 1), date(2024, 1, 7)));

        // On a Monday the previous full week is reported
        let period = period_for(ReportType::Weekly, date(2024, 1, 8));
        assert_eq!(period, ReportPeriod::new(date(2024, 1, 1), date(2024, 1, 7)));
    }

    #[test]
    fn test_daily_and_monthly_periods() {
        assert_eq!(
            period_for(ReportType::Daily, date(2024, 3, 1)),
            ReportPeriod::new(date(2024, 2, 29), date(2024, 2, 29))
        );
        assert_eq!(
            period_for(ReportType::Monthly, date(2024, 3, 15)),
            ReportPeriod::new(date(2024, 2, 1), date(2024, 2, 29))
        );
        assert_eq!(
            period_for(ReportType::Monthly, date(2024, 1, 1)),
            ReportPeriod::new(date(2023, 12, 1), date(2023, 12, 31))
        );
    }

    #[test]
    fn test_previous_period() {
        let week = ReportPeriod::new(date(2024, 1, 1), date(2024, 1, 7));
        assert_eq!(
            week.previous(ReportType::Weekly),
            ReportPeriod::new(date(2023, 12, 25), date(2023, 12, 31))
        );

        let march = ReportPeriod::new(date(2024, 3, 1), date(2024, 3, 31));
        assert_eq!(
            march.previous(ReportType::Monthly),
            ReportPeriod::new(date(2024, 2, 1), date(2024, 2, 29))
        );
    }

    #[test]
    fn test_named_ranges() {
        let today = date(2024, 1, 10);
        assert_eq!(named_range("yesterday", today).start, date(2024, 1, 9));
        assert_eq!(
            named_range("this_week", today),
            ReportPeriod::new(date(2024, 1, 8), today)
        );
        assert_eq!(
            named_range("this_month", today),
            ReportPeriod::new(date(2024, 1, 1), today)
        );
        assert_eq!(named_range("last_30_days", today).start, date(2023, 12, 11));
        assert_eq!(
            named_range("someday", today),
            named_range("last_week", today)
        );
    }

    #[test]
    fn test_report_type_parse() {
        assert_eq!(ReportType::parse("Weekly"), Some(ReportType::Weekly));
        assert_eq!(ReportType::parse("hourly"), None);
        assert_eq!(ReportType::from_frequency(Frequency::Disabled), None);
    }
}
