pub mod db;
pub mod message;
pub mod period;
pub mod schedule;
pub mod scheduler;
pub mod settings;

use crate::clients::gemini::GeminiModel;
use crate::clients::google_ads::PerformanceMetrics;
use crate::clients::search_console::SearchAnalytics;
use crate::db::run_blocking;
use crate::error::{AppError, AppResult};
use crate::i18n::{t, DEFAULT_LANG};
use crate::models::{NewReportHistory, ReportHistory, Tenant};
use crate::observability::METRICS;
use crate::services::credentials;
use crate::state::AppState;
use crate::{find_active_ads_account, find_active_search_console_account, find_tenant_by_id};
use chrono::Utc;
use message::{build_report_message, insight_prompt, sparkline, MetricChanges, ReportContent};
use period::{period_for, ReportPeriod, ReportType};
use schedule::DEFAULT_TIMEZONE;
use serde_json::json;
use std::time::Instant;

const TREND_REPORTS: i64 = 7;

pub struct ReportRequest {
    pub tenant_id: i32,
    pub report_type: ReportType,
    /// Overrides the period derived from `report_type`.
    pub period: Option<ReportPeriod>,
    pub campaign_ids: Option<Vec<String>>,
}

pub async fn generate_report(state: &AppState, request: ReportRequest) -> AppResult<ReportHistory> {
    let started = Instant::now();
    let report_type = request.report_type;

    let result = build_and_deliver(state, request).await;

    METRICS.record_report(report_type.as_str(), result.is_ok());
    METRICS.report_generation_latency.observe(started.elapsed());

    match &result {
        Ok(report) => tracing::info!(
            "Generated {} report {} for tenant {}",
            report_type.as_str(),
            report.id,
            report.tenant_id
        ),
        Err(e) => tracing::error!("Failed to generate {} report: {}", report_type.as_str(), e),
    }
    result
}

async fn build_and_deliver(state: &AppState, request: ReportRequest) -> AppResult<ReportHistory> {
    let tenant_id = request.tenant_id;
    let tenant = run_blocking(&state.pool, move |pool| find_tenant_by_id(pool, tenant_id))
        .await?
        .ok_or_else(|| AppError::TenantNotFound(tenant_id.to_string()))?;

    let account = run_blocking(&state.pool, move |pool| find_active_ads_account(pool, tenant_id))
        .await?
        .ok_or_else(|| AppError::oauth(crate::PROVIDER_GOOGLE))?;

    let report_type = request.report_type;
    let period = request.period.unwrap_or_else(|| {
        let today = Utc::now().with_timezone(&DEFAULT_TIMEZONE).date_naive();
        period_for(report_type, today)
    });
    let previous_period = period.previous(report_type);
    let campaign_ids = request.campaign_ids.as_deref();

    let access_token = credentials::google_access_token(state, tenant_id).await?;

    let ads_started = Instant::now();
    let current = state
        .google_ads
        .performance_metrics(
            &access_token,
            &account.customer_id,
            period.start,
            period.end,
            campaign_ids,
        )
        .await
        .map_err(|e| AppError::from_client(crate::PROVIDER_GOOGLE, e))?;
    let previous = state
        .google_ads
        .performance_metrics(
            &access_token,
            &account.customer_id,
            previous_period.start,
            previous_period.end,
            campaign_ids,
        )
        .await
        .map_err(|e| AppError::from_client(crate::PROVIDER_GOOGLE, e))?;
    METRICS.google_ads_latency.observe(ads_started.elapsed());

    let changes = MetricChanges::between(&current, &previous);
    let search_console = search_console_summary(state, tenant_id, period).await;
    let insight = generate_insight(state, report_type, &current, &changes).await;

    let mut costs = run_blocking(&state.pool, move |pool| {
        db::recent_report_costs(pool, tenant_id, TREND_REPORTS)
    })
    .await
    .unwrap_or_default();
    costs.push(current.cost);
    let trend = if costs.len() > 1 { sparkline(&costs) } else { String::new() };

    let content = ReportContent {
        report_type,
        period,
        metrics: &current,
        changes: &changes,
        insight: &insight,
        trend: &trend,
        search_console: search_console.as_ref(),
    };
    let slack_ts = post_report(state, &tenant, &content).await;

    let metrics_json = json!({
        "current": current,
        "previous": previous,
        "changes": changes,
        "search_console": search_console,
        "customer_id": account.customer_id,
    });

    let report_type_name = report_type.as_str();
    let report = run_blocking(&state.pool, move |pool| {
        db::insert_report_history(
            pool,
            NewReportHistory {
                tenant_id,
                report_type: report_type_name,
                period_start: period.start,
                period_end: period.end,
                slack_message_ts: slack_ts.as_deref(),
                gemini_insight: Some(&insight),
                metrics: metrics_json,
            },
        )
    })
    .await?;

    Ok(report)
}

/// Gemini commentary, or the fixed fallback sentence when Gemini is unavailable.
pub async fn generate_insight(
    state: &AppState,
    report_type: ReportType,
    metrics: &PerformanceMetrics,
    changes: &MetricChanges,
) -> String {
    let fallback = t(DEFAULT_LANG, "report.fallback_insight");
    if !state.gemini.is_configured() {
        return fallback;
    }

    let started = Instant::now();
    let prompt = insight_prompt(report_type, metrics, changes);
    let result = state.gemini.generate(GeminiModel::Flash, &prompt, 0.7).await;
    METRICS.gemini_latency.observe(started.elapsed());

    match result {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!("Gemini insight failed, using fallback: {}", e);
            fallback
        }
    }
}

async fn search_console_summary(
    state: &AppState,
    tenant_id: i32,
    period: ReportPeriod,
) -> Option<SearchAnalytics> {
    let account = run_blocking(&state.pool, move |pool| {
        find_active_search_console_account(pool, tenant_id)
    })
    .await
    .ok()
    .flatten()?;

    let token = match credentials::gsc_access_token(state, &account).await {
        Ok(token) => token,
        Err(e) => {
            tracing::warn!("Search Console token unavailable for tenant {}: {}", tenant_id, e);
            return None;
        }
    };

    match state
        .search_console
        .search_analytics(&token, &account.site_url, period.start, period.end)
        .await
    {
        Ok(stats) => Some(stats),
        Err(e) => {
            tracing::warn!("Search Console query failed for tenant {}: {}", tenant_id, e);
            None
        }
    }
}

/// Posting failures are logged; the report is still recorded.
async fn post_report(state: &AppState, tenant: &Tenant, content: &ReportContent<'_>) -> Option<String> {
    let Some(channel) = tenant.slack_channel_id.as_deref() else {
        tracing::warn!("Tenant {} has no Slack channel configured", tenant.id);
        return None;
    };

    let token = match credentials::slack_bot_token(state, tenant) {
        Ok(token) => token,
        Err(e) => {
            tracing::warn!("No Slack bot token for tenant {}: {}", tenant.id, e);
            return None;
        }
    };

    let (text, blocks) = build_report_message(DEFAULT_LANG, content);
    match state
        .slack
        .post_message(&token, channel, &text, Some(blocks), None)
        .await
    {
        Ok(posted) => Some(posted.ts),
        Err(e) => {
            tracing::error!("Failed to post report for tenant {}: {}", tenant.id, e);
            None
        }
    }
}
