//! Formatting of report numbers, the Gemini prompt and the Slack report message.

use super::period::{ReportPeriod, ReportType};
use crate::clients::google_ads::PerformanceMetrics;
use crate::clients::search_console::SearchAnalytics;
use crate::clients::slack::{context, escape, header, section};
use crate::i18n::{t, t_with_args};
use serde::Serialize;
use serde_json::{json, Value};

const SPARK_CHARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Percent change per metric against the previous period; `None` when there is no baseline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricChanges {
    pub cost: Option<f64>,
    pub clicks: Option<f64>,
    pub impressions: Option<f64>,
    pub conversions: Option<f64>,
    pub cpc: Option<f64>,
    pub cpa: Option<f64>,
}

pub fn change_percent(current: f64, previous: f64) -> Option<f64> {
    if previous == 0.0 {
        return None;
    }
    Some(((current - previous) / previous * 1000.0).round() / 10.0)
}

impl MetricChanges {
    pub fn between(current: &PerformanceMetrics, previous: &PerformanceMetrics) -> Self {
        Self {
            cost: change_percent(current.cost, previous.cost),
            clicks: change_percent(current.clicks as f64, previous.clicks as f64),
            impressions: change_percent(current.impressions as f64, previous.impressions as f64),
            conversions: change_percent(current.conversions, previous.conversions),
            cpc: change_percent(current.cpc, previous.cpc),
            cpa: change_percent(current.cpa, previous.cpa),
        }
    }
}

pub fn format_change(change: Option<f64>) -> String {
    match change {
        Some(c) if c > 0.0 => format!("▲{:.1}%", c),
        Some(c) if c < 0.0 => format!("▼{:.1}%", c.abs()),
        Some(_) => "0.0%".to_string(),
        None => "-".to_string(),
    }
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

pub fn format_count(value: i64) -> String {
    let grouped = group_thousands(&value.unsigned_abs().to_string());
    if value < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

pub fn format_won(value: f64) -> String {
    format!("₩{}", format_count(value.round() as i64))
}

/// One bar per value, scaled between the series minimum and maximum.
pub fn sparkline(values: &[f64]) -> String {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let (Some(min), Some(max)) = (
        finite.iter().copied().reduce(f64::min),
        finite.iter().copied().reduce(f64::max),
    ) else {
        return String::new();
    };

    let span = max - min;
    finite
        .iter()
        .map(|v| {
            if span == 0.0 {
                SPARK_CHARS[SPARK_CHARS.len() / 2]
            } else {
                let idx = ((v - min) / span * (SPARK_CHARS.len() - 1) as f64).round() as usize;
                SPARK_CHARS[idx.min(SPARK_CHARS.len() - 1)]
            }
        })
        .collect()
}

pub fn insight_prompt(
    report_type: ReportType,
    metrics: &PerformanceMetrics,
    changes: &MetricChanges,
) -> String {
    let cpa = if metrics.cpa > 0.0 {
        format_won(metrics.cpa)
    } else {
        "전환 없음".to_string()
    };

    format!(
        "당신은 10년 경력의 B2B 검색광고(SEM) 전문가입니다.\n\
         아래 {} Google Ads 성과를 분석하여 담당자가 바로 활용할 수 있는 한국어 코멘트를 정확히 3문장으로 작성하세요.\n\n\
         - 비용: {} (이전 대비 {})\n\
         - 노출: {}회 (이전 대비 {})\n\
         - 클릭: {}회 (이전 대비 {})\n\
         - 전환: {:.0}건 (이전 대비 {})\n\
         - CPC: {} (이전 대비 {})\n\
         - CPA: {} (이전 대비 {})\n\n\
         첫 문장은 전체 성과 평가, 둘째 문장은 가장 주목할 지표 변화, 셋째 문장은 다음 기간의 구체적인 액션 1가지입니다. ROAS는 언급하지 마세요.",
        t("ko", &format!("report.types.{}", report_type.as_str())),
        format_won(metrics.cost),
        format_change(changes.cost),
        format_count(metrics.impressions),
        format_change(changes.impressions),
        format_count(metrics.clicks),
        format_change(changes.clicks),
        metrics.conversions,
        format_change(changes.conversions),
        format_won(metrics.cpc),
        format_change(changes.cpc),
        cpa,
        format_change(changes.cpa),
    )
}

pub struct ReportContent<'a> {
    pub report_type: ReportType,
    pub period: ReportPeriod,
    pub metrics: &'a PerformanceMetrics,
    pub changes: &'a MetricChanges,
    pub insight: &'a str,
    pub trend: &'a str,
    pub search_console: Option<&'a SearchAnalytics>,
}

/// Returns the fallback text and the Block Kit blocks.
pub fn build_report_message(lang: &str, content: &ReportContent) -> (String, Value) {
    let type_label = t(lang, &format!("report.types.{}", content.report_type.as_str()));
    let title = t_with_args(
        lang,
        "report.title",
        &[
            &type_label,
            &content.period.start.to_string(),
            &content.period.end.to_string(),
        ],
    );

    let m = content.metrics;
    let c = content.changes;
    let line = |key: &str, value: String, change: Option<f64>| {
        format!("*{}:* {} ({})", t(lang, key), value, format_change(change))
    };

    let summary = [
        line("report.cost", format_won(m.cost), c.cost),
        line("report.impressions", format_count(m.impressions), c.impressions),
        line("report.clicks", format_count(m.clicks), c.clicks),
        line("report.conversions", format!("{:.0}", m.conversions), c.conversions),
        format!("*{}:* {:.2}%", t(lang, "report.ctr"), m.ctr),
        line("report.cpc", format_won(m.cpc), c.cpc),
        line("report.cpa", format_won(m.cpa), c.cpa),
    ]
    .join("\n");

    let mut blocks = vec![header(&title), section(&summary)];

    if let Some(gsc) = content.search_console {
        blocks.push(section(&format!(
            "*Search Console:* {} {} · {} {} · CTR {:.2}% · #{:.1}",
            t(lang, "report.clicks"),
            format_count(gsc.clicks),
            t(lang, "report.impressions"),
            format_count(gsc.impressions),
            gsc.ctr,
            gsc.position,
        )));
    }

    blocks.push(section(&format!(
        "*{}*\n{}",
        t(lang, "report.insight_title"),
        escape(content.insight)
    )));

    if !content.trend.is_empty() {
        blocks.push(context(&format!("{}: {}", t(lang, "report.trend"), content.trend)));
    }

    (title, json!(blocks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_change_percent() {
        assert_eq!(change_percent(120.0, 100.0), Some(20.0));
        assert_eq!(change_percent(50.0, 200.0), Some(-75.0));
        assert_eq!(change_percent(10.0, 0.0), None);
        assert_eq!(change_percent(1.0, 3.0), Some(-66.7));
    }

    #[test]
    fn test_format_change() {
        assert_eq!(format_change(Some(12.34)), "▲12.3%");
        assert_eq!(format_change(Some(-4.0)), "▼4.0%");
        assert_eq!(format_change(None), "-");
    }

    #[test]
    fn test_format_numbers() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1234567), "1,234,567");
        assert_eq!(format_count(-1000), "-1,000");
        assert_eq!(format_won(15000.4), "₩15,000");
    }

    #[test]
    fn test_sparkline() {
        assert_eq!(sparkline(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]), "▁▂▃▄▅▆▇█");
        assert_eq!(sparkline(&[5.0, 5.0]), "▅▅");
        assert_eq!(sparkline(&[]), "");
        assert_eq!(sparkline(&[0.0, 100.0]), "▁█");
    }

    #[test]
    fn test_build_report_message() {
        let metrics = PerformanceMetrics::from_totals(150000.0, 300, 10000, 6.0, 0.0);
        let changes = MetricChanges {
            cost: Some(10.0),
            ..Default::default()
        };
        let content = ReportContent {
            report_type: ReportType::Weekly,
            period: ReportPeriod::new(
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 7).unwrap(),
            ),
            metrics: &metrics,
            changes: &changes,
            insight: "비용 <증가>",
            trend: "▁▅█",
            search_console: None,
        };

        let (text, blocks) = build_report_message("ko", &content);
        assert_eq!(text, "📊 주간 성과 리포트 (2024-01-01 ~ 2024-01-07)");

        let blocks = blocks.as_array().unwrap();
        assert_eq!(blocks.len(), 4);
        let summary = blocks[1]["text"]["text"].as_str().unwrap();
        assert!(summary.contains("*비용:* ₩150,000 (▲10.0%)"));
        assert!(summary.contains("*CPA:* ₩25,000 (-)"));
        assert!(blocks[2]["text"]["text"].as_str().unwrap().contains("비용 &lt;증가&gt;"));
    }

    #[test]
    fn test_insight_prompt_mentions_no_conversions() {
        let metrics = PerformanceMetrics::from_totals(1000.0, 10, 100, 0.0, 0.0);
        let prompt = insight_prompt(ReportType::Daily, &metrics, &MetricChanges::default());
        assert!(prompt.contains("일간"));
        assert!(prompt.contains("CPA: 전환 없음"));
    }
}
