//! Parsing of free-text schedule settings (`/sem-config weekly 09:00`, `매주 월요일 9시`).

use crate::i18n::{t, t_index, t_with_args};
use crate::models::{Frequency, ReportSchedule, ReportScheduleChanges};
use chrono::{NaiveTime, Timelike};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleUpdate {
    pub frequency: Option<Frequency>,
    pub time_of_day: Option<NaiveTime>,
    /// 0 = Monday.
    pub day_of_week: Option<i32>,
    pub day_of_month: Option<i32>,
}

impl ScheduleUpdate {
    pub fn is_empty(&self) -> bool {
        *self == ScheduleUpdate::default()
    }

    /// Switching to monthly without a day picks the 1st; weekly without a day keeps the stored one.
    pub fn into_changes(self, current: Option<&ReportSchedule>) -> ReportScheduleChanges {
        let mut changes = ReportScheduleChanges::default();

        if let Some(frequency) = self.frequency {
            changes.frequency = Some(frequency.as_str().to_string());
            changes.is_active = Some(frequency != Frequency::Disabled);

            match frequency {
                Frequency::Weekly if self.day_of_week.is_none() => {
                    if current.and_then(|s| s.day_of_week).is_none() {
                        changes.day_of_week = Some(Some(0));
                    }
                }
                Frequency::Monthly if self.day_of_month.is_none() => {
                    if current.and_then(|s| s.day_of_month).is_none() {
                        changes.day_of_month = Some(Some(1));
                    }
                }
                _ => {}
            }
        }

        if let Some(day) = self.day_of_week {
            changes.day_of_week = Some(Some(day));
        }
        if let Some(day) = self.day_of_month {
            changes.day_of_month = Some(Some(day));
        }
        changes.time_of_day = self.time_of_day;
        changes
    }
}

pub fn parse_frequency_word(word: &str) -> Option<Frequency> {
    match word.trim().to_lowercase().as_str() {
        "daily" | "매일" => Some(Frequency::Daily),
        "weekly" | "매주" => Some(Frequency::Weekly),
        "monthly" | "매월" | "매달" => Some(Frequency::Monthly),
        "disabled" | "disable" | "off" | "끄기" | "중지" => Some(Frequency::Disabled),
        _ => None,
    }
}

pub fn parse_weekday(word: &str) -> Option<i32> {
    let word = word.trim().to_lowercase();
    const DAYS: [(&str, &str, &str); 7] = [
        ("monday", "mon", "월"),
        ("tuesday", "tue", "화"),
        ("wednesday", "wed", "수"),
        ("thursday", "thu", "목"),
        ("friday", "fri", "금"),
        ("saturday", "sat", "토"),
        ("sunday", "sun", "일"),
    ];

    DAYS.iter().position(|(long, short, ko)| {
        word == *long
            || word == *short
            || word == format!("{}요일", ko)
    })
    .map(|index| index as i32)
}

/// `HH:MM`, `H:MM` or `9시`.
pub fn parse_time(word: &str) -> Option<NaiveTime> {
    let word = word.trim();
    if let Some((hour, minute)) = word.split_once(':') {
        let hour: u32 = hour.parse().ok()?;
        let minute: u32 = minute.parse().ok()?;
        return NaiveTime::from_hms_opt(hour, minute, 0);
    }

    let hour: u32 = word.strip_suffix('시')?.parse().ok()?;
    NaiveTime::from_hms_opt(hour, 0, 0)
}

fn parse_day_of_month(word: &str) -> Option<i32> {
    let day: i32 = word.trim().strip_suffix('일')?.parse().ok()?;
    (1..=31).contains(&day).then_some(day)
}

pub fn parse_schedule_text(text: &str) -> ScheduleUpdate {
    let mut update = ScheduleUpdate::default();

    for word in text.split_whitespace() {
        if let Some(frequency) = parse_frequency_word(word) {
            update.frequency = Some(frequency);
        } else if let Some(time) = parse_time(word) {
            update.time_of_day = Some(time);
        } else if let Some(day) = parse_weekday(word) {
            update.day_of_week = Some(day);
        } else if let Some(day) = parse_day_of_month(word) {
            update.day_of_month = Some(day);
        }
    }

    update
}

/// e.g. `매주 월요일`, `매월 15일`, `매일`.
pub fn describe_frequency(lang: &str, schedule: &ReportSchedule) -> String {
    let frequency = schedule.frequency();
    let label = t(lang, &format!("slack.frequency.{}", frequency.as_str()));

    match frequency {
        Frequency::Weekly => match schedule.day_of_week {
            Some(day) if (0..7).contains(&day) => {
                format!("{} {}", label, t_index(lang, "slack.weekdays", day as usize))
            }
            _ => label,
        },
        Frequency::Monthly => match schedule.day_of_month {
            Some(day) => format!(
                "{} {}",
                label,
                t_with_args(lang, "slack.day_of_month", &[&day.to_string()])
            ),
            None => label,
        },
        _ => label,
    }
}

pub fn format_time(time: NaiveTime) -> String {
    format!("{:02}:{:02}", time.hour(), time.minute())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn schedule(frequency: &str, day_of_week: Option<i32>, day_of_month: Option<i32>) -> ReportSchedule {
        let now = Utc::now();
        ReportSchedule {
            id: 1,
            tenant_id: 1,
            frequency: frequency.into(),
            day_of_week,
            day_of_month,
            time_of_day: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            timezone: "Asia/Seoul".into(),
            campaign_ids: None,
            is_active: true,
            last_triggered_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_parse_english_command() {
        let update = parse_schedule_text("weekly 14:30");
        assert_eq!(update.frequency, Some(Frequency::Weekly));
        assert_eq!(update.time_of_day, NaiveTime::from_hms_opt(14, 30, 0));
        assert_eq!(update.day_of_week, None);
    }

    #[test]
    fn test_parse_korean_command() {
        let update = parse_schedule_text("매주 금요일 9시");
        assert_eq!(update.frequency, Some(Frequency::Weekly));
        assert_eq!(update.day_of_week, Some(4));
        assert_eq!(update.time_of_day, NaiveTime::from_hms_opt(9, 0, 0));

        let monthly = parse_schedule_text("매월 15일 08:00");
        assert_eq!(monthly.frequency, Some(Frequency::Monthly));
        assert_eq!(monthly.day_of_month, Some(15));
    }

    #[test]
    fn test_parse_off_and_invalid_time() {
        assert_eq!(parse_schedule_text("끄기").frequency, Some(Frequency::Disabled));
        assert_eq!(parse_schedule_text("OFF").frequency, Some(Frequency::Disabled));
        assert!(parse_schedule_text("25:00").is_empty());
        assert!(parse_schedule_text("hello there").is_empty());
    }

    #[test]
    fn test_into_changes_defaults_days() {
        let changes = parse_schedule_text("monthly").into_changes(None);
        assert_eq!(changes.frequency.as_deref(), Some("monthly"));
        assert_eq!(changes.day_of_month, Some(Some(1)));
        assert_eq!(changes.is_active, Some(true));

        let existing = schedule("weekly", Some(3), None);
        let changes = parse_schedule_text("weekly 10:00").into_changes(Some(&existing));
        assert_eq!(changes.day_of_week, None);
        assert_eq!(changes.time_of_day, NaiveTime::from_hms_opt(10, 0, 0));

        let disabled = parse_schedule_text("off").into_changes(Some(&existing));
        assert_eq!(disabled.is_active, Some(false));
    }

    #[test]
    fn test_describe_frequency() {
        assert_eq!(describe_frequency("ko", &schedule("weekly", Some(0), None)), "매주 월요일");
        assert_eq!(describe_frequency("ko", &schedule("monthly", None, Some(31))), "매월 31일");
        assert_eq!(describe_frequency("ko", &schedule("daily", None, None)), "매일");
        assert_eq!(describe_frequency("en", &schedule("weekly", Some(6), None)), "weekly Sunday");
        assert_eq!(format_time(NaiveTime::from_hms_opt(7, 5, 0).unwrap()), "07:05");
    }
}
