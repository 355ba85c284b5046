//! Turns a classified intent into work and a reply for the Slack thread.

use crate::clients::gemini::GeminiModel;
use crate::clients::google_ads::{KeywordIdea, PerformanceMetrics};
use crate::db::run_blocking;
use crate::error::{AppError, AppResult};
use crate::find_active_ads_account;
use crate::i18n::{t, t_with_args};
use crate::observability::METRICS;
use crate::services::credentials;
use crate::services::intent::{ChatTurn, Entities, Intent, ParsedIntent};
use crate::services::keywords::suggest_keywords;
use crate::services::reports::message::{format_count, format_won};
use crate::services::reports::period::{named_range, ReportPeriod, ReportType};
use crate::services::reports::settings::{
    describe_frequency, format_time, parse_frequency_word, parse_schedule_text, parse_time,
    parse_weekday, ScheduleUpdate,
};
use crate::services::reports::{db as report_db, generate_report, ReportRequest};
use crate::state::AppState;
use chrono::{NaiveDate, Utc};
use std::time::Instant;

const CHAT_HISTORY: usize = 5;
const KEYWORD_IDEAS: usize = 10;
const DEFAULT_RANGE: &str = "last_week";

pub async fn route_action(
    state: &AppState,
    tenant_id: i32,
    parsed: &ParsedIntent,
    message: &str,
    history: &[ChatTurn],
    lang: &str,
) -> String {
    tracing::info!(
        "Routing intent {} for tenant {}",
        parsed.intent.as_str(),
        tenant_id
    );

    let result = match parsed.intent {
        Intent::GenerateReport => handle_report(state, tenant_id, &parsed.entities, lang).await,
        Intent::ChangeSchedule => {
            handle_schedule(state, tenant_id, &parsed.entities, message, lang).await
        }
        Intent::AnswerQuestion => {
            handle_question(state, tenant_id, &parsed.entities, message, history).await
        }
        Intent::KeywordSuggestion => {
            handle_keywords(state, tenant_id, &parsed.entities, message, lang).await
        }
        Intent::GeneralChat => Ok(general_chat(state, message, history, lang).await),
    };

    result.unwrap_or_else(|e| {
        tracing::warn!(
            "Intent {} failed for tenant {}: {}",
            parsed.intent.as_str(),
            tenant_id,
            e
        );
        e.user_message(lang)
    })
}

/// Explicit dates win over a named range; nothing at all means last week.
pub fn resolve_period(entities: &Entities, today: NaiveDate) -> ReportPeriod {
    if let Some(range) = entities.date_range {
        return ReportPeriod::new(range.start, range.end);
    }
    named_range(
        entities.time_period.as_deref().unwrap_or(DEFAULT_RANGE),
        today,
    )
}

async fn handle_report(
    state: &AppState,
    tenant_id: i32,
    entities: &Entities,
    lang: &str,
) -> AppResult<String> {
    let period = resolve_period(entities, Utc::now().date_naive());

    let report = generate_report(
        state,
        ReportRequest {
            tenant_id,
            report_type: ReportType::Custom,
            period: Some(period),
            campaign_ids: None,
        },
    )
    .await?;

    Ok(t_with_args(
        lang,
        "conversation.report_done",
        &[&report.period_start.to_string(), &report.period_end.to_string()],
    ))
}

/// Entities first, then the raw message for anything the model left out.
pub fn schedule_update_from(entities: &Entities, message: &str) -> ScheduleUpdate {
    let from_text = parse_schedule_text(message);

    ScheduleUpdate {
        frequency: entities
            .schedule_frequency
            .as_deref()
            .and_then(parse_frequency_word)
            .or(from_text.frequency),
        time_of_day: entities
            .schedule_time
            .as_deref()
            .and_then(parse_time)
            .or(from_text.time_of_day),
        day_of_week: entities
            .schedule_day
            .as_deref()
            .and_then(parse_weekday)
            .or(from_text.day_of_week),
        day_of_month: from_text.day_of_month,
    }
}

async fn handle_schedule(
    state: &AppState,
    tenant_id: i32,
    entities: &Entities,
    message: &str,
    lang: &str,
) -> AppResult<String> {
    let update = schedule_update_from(entities, message);
    if update.is_empty() {
        return Ok(t(lang, "conversation.schedule_unclear"));
    }

    let schedule = run_blocking(&state.pool, move |pool| {
        let current = report_db::get_or_create_schedule(pool, tenant_id)?;
        report_db::update_schedule(pool, tenant_id, update.into_changes(Some(&current)))
    })
    .await?;

    Ok(t_with_args(
        lang,
        "conversation.schedule_changed",
        &[
            &describe_frequency(lang, &schedule),
            &format_time(schedule.time_of_day),
        ],
    ))
}

pub fn question_prompt(
    message: &str,
    period: ReportPeriod,
    campaigns: &[String],
    metrics: &PerformanceMetrics,
) -> String {
    let scope = if campaigns.is_empty() {
        "전체 캠페인".to_string()
    } else {
        campaigns.join(", ")
    };

    format!(
        "다음 Google Ads 데이터를 바탕으로 사용자의 질문에 자연스럽게 한국어로 답변하세요.\n\n\
         질문: {}\n기간: {} ~ {}\n범위: {}\n\n\
         비용: {}\n노출: {}\n클릭: {}\nCTR: {:.2}%\n전환: {:.1}\nCPC: {}\nCPA: {}\n\n\
         핵심 수치를 강조하고 3~5문장으로 답하세요.",
        message,
        period.start,
        period.end,
        scope,
        format_won(metrics.cost),
        format_count(metrics.impressions),
        format_count(metrics.clicks),
        metrics.ctr,
        metrics.conversions,
        format_won(metrics.cpc),
        format_won(metrics.cpa),
    )
}

async fn handle_question(
    state: &AppState,
    tenant_id: i32,
    entities: &Entities,
    message: &str,
    history: &[ChatTurn],
) -> AppResult<String> {
    let account = run_blocking(&state.pool, move |pool| find_active_ads_account(pool, tenant_id))
        .await?
        .ok_or_else(|| AppError::oauth(crate::PROVIDER_GOOGLE))?;
    let access_token = credentials::google_access_token(state, tenant_id).await?;
    let period = resolve_period(entities, Utc::now().date_naive());

    let started = Instant::now();
    let metrics = state
        .google_ads
        .performance_metrics(&access_token, &account.customer_id, period.start, period.end, None)
        .await
        .map_err(|e| AppError::from_client(crate::PROVIDER_GOOGLE, e))?;
    METRICS.google_ads_latency.observe(started.elapsed());

    let mut prompt = question_prompt(message, period, &entities.campaign_names, &metrics);
    append_history(&mut prompt, history);

    let started = Instant::now();
    let answer = state
        .gemini
        .generate(GeminiModel::Flash, &prompt, 0.5)
        .await
        .map_err(|e| AppError::from_client("gemini", e));
    METRICS.gemini_latency.observe(started.elapsed());
    answer
}

pub fn format_keyword_ideas(lang: &str, ideas: &[KeywordIdea]) -> String {
    if ideas.is_empty() {
        return t(lang, "keyword.ideas_empty");
    }

    let mut out = format!("*{}*\n", t(lang, "keyword.ideas_title"));
    for (index, idea) in ideas.iter().enumerate() {
        out.push_str(&t_with_args(
            lang,
            "keyword.idea_line",
            &[
                &(index + 1).to_string(),
                &idea.keyword,
                &format_count(idea.avg_monthly_searches),
                &idea.competition,
                &format_won(idea.low_bid as f64),
                &format_won(idea.high_bid as f64),
            ],
        ));
        out.push('\n');
    }
    out
}

async fn handle_keywords(
    state: &AppState,
    tenant_id: i32,
    entities: &Entities,
    message: &str,
    lang: &str,
) -> AppResult<String> {
    let seeds = if entities.keywords.is_empty() {
        vec![message.trim().to_string()]
    } else {
        entities.keywords.clone()
    };

    let ideas = suggest_keywords(state, tenant_id, &seeds, KEYWORD_IDEAS).await?;
    Ok(format_keyword_ideas(lang, &ideas))
}

fn append_history(prompt: &mut String, history: &[ChatTurn]) {
    if history.is_empty() {
        return;
    }
    prompt.push_str("\n\n이전 대화:\n");
    let skip = history.len().saturating_sub(CHAT_HISTORY);
    for turn in &history[skip..] {
        prompt.push_str(&format!("{}: {}\n", turn.role, turn.content));
    }
}

pub fn general_chat_prompt(message: &str, history: &[ChatTurn]) -> String {
    let mut prompt = String::from(
        "당신은 친절한 Google Ads 검색 광고 어시스턴트입니다. 간결하고 대화하듯 답하세요.",
    );
    append_history(&mut prompt, history);
    prompt.push_str(&format!("\n사용자 메시지: {}", message));
    prompt
}

async fn general_chat(state: &AppState, message: &str, history: &[ChatTurn], lang: &str) -> String {
    if !state.gemini.is_configured() {
        return t(lang, "conversation.fallback");
    }

    let prompt = general_chat_prompt(message, history);
    match state.gemini.generate(GeminiModel::Flash, &prompt, 0.7).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!("General chat reply failed: {}", e);
            t(lang, "conversation.fallback")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::intent::DateRange;
    use crate::models::Frequency;
    use chrono::NaiveTime;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_resolve_period_prefers_explicit_dates() {
        let entities = Entities {
            date_range: Some(DateRange {
                start: date(2026, 3, 1),
                end: date(2026, 3, 5),
            }),
            time_period: Some("yesterday".into()),
            ..Default::default()
        };
        let period = resolve_period(&entities, date(2026, 3, 20));
        assert_eq!((period.start, period.end), (date(2026, 3, 1), date(2026, 3, 5)));
    }

    #[test]
    fn test_resolve_period_named_and_default() {
        let today = date(2026, 3, 20);
        let yesterday = Entities {
            time_period: Some("yesterday".into()),
            ..Default::default()
        };
        let period = resolve_period(&yesterday, today);
        assert_eq!((period.start, period.end), (date(2026, 3, 19), date(2026, 3, 19)));

        let period = resolve_period(&Entities::default(), today);
        assert_eq!((period.start, period.end), (date(2026, 3, 13), date(2026, 3, 19)));
    }

    #[test]
    fn test_schedule_update_merges_entities_and_text() {
        let entities = Entities {
            schedule_frequency: Some("weekly".into()),
            ..Default::default()
        };
        let update = schedule_update_from(&entities, "매주 화요일 10:30으로 바꿔줘");
        assert_eq!(update.frequency, Some(Frequency::Weekly));
        assert_eq!(update.day_of_week, Some(1));
        assert_eq!(update.time_of_day, None);

        let entities = Entities {
            schedule_time: Some("08:00".into()),
            ..Default::default()
        };
        let update = schedule_update_from(&entities, "daily please");
        assert_eq!(update.frequency, Some(Frequency::Daily));
        assert_eq!(update.time_of_day, NaiveTime::from_hms_opt(8, 0, 0));
    }

    #[test]
    fn test_format_keyword_ideas() {
        assert_eq!(format_keyword_ideas("ko", &[]), "추천할 키워드를 찾지 못했습니다.");

        let ideas = vec![KeywordIdea {
            keyword: "러닝화".into(),
            avg_monthly_searches: 12000,
            competition: "HIGH".into(),
            low_bid: 500,
            high_bid: 1800,
        }];
        let text = format_keyword_ideas("ko", &ideas);
        assert!(text.starts_with("*🔎 추천 키워드*"));
        assert!(text.contains("1. *러닝화* · 월간 검색 12,000 · 경쟁 HIGH · 입찰가 ₩500~₩1,800"));
    }

    #[test]
    fn test_general_chat_prompt_keeps_last_turns() {
        let history: Vec<ChatTurn> = (0..7)
            .map(|i| ChatTurn {
                role: "user".into(),
                content: format!("turn-{}", i),
            })
            .collect();
        let prompt = general_chat_prompt("안녕", &history);
        assert!(!prompt.contains("turn-1"));
        assert!(prompt.contains("turn-2"));
        assert!(prompt.ends_with("사용자 메시지: 안녕"));
    }

    #[test]
    fn test_question_prompt_includes_scope() {
        let metrics = PerformanceMetrics::from_totals(50000.0, 100, 2000, 2.0, 0.0);
        let period = ReportPeriod::new(date(2026, 3, 1), date(2026, 3, 7));
        let prompt = question_prompt("지난주 비용은?", period, &["브랜드".into()], &metrics);
        assert!(prompt.contains("범위: 브랜드"));
        assert!(prompt.contains("비용: ₩50,000"));
        assert!(prompt.contains("2026-03-01 ~ 2026-03-07"));
    }
}
