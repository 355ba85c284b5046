//! Inefficient search term detection and the Slack approval workflow for negative keywords.
//!
//! A search term is flagged when it spent at least the tenant's cost threshold, got at least the
//! click threshold and converted nothing. Each flagged term becomes a candidate, and each
//! candidate gets one approval request posted to Slack. Approving adds an EXACT negative keyword
//! to the campaign; ignoring suppresses the term for a day.

pub mod db;
pub mod monitor;

use crate::clients::google_ads::{KeywordIdea, SearchTermRow};
use crate::clients::slack::{actions, button, context, escape, header, section};
use crate::db::run_blocking;
use crate::error::{AppError, AppResult};
use crate::i18n::{t, t_with_args, DEFAULT_LANG};
use crate::models::{
    ApprovalAction, ApprovalRequest, KeywordCandidate, KeywordStatus, NewKeywordCandidate,
    PerformanceThreshold, Tenant,
};
use crate::observability::METRICS;
use crate::services::credentials;
use crate::services::reports::message::{format_count, format_won};
use crate::state::AppState;
use crate::{find_active_ads_account, find_thresholds, PROVIDER_GOOGLE, PROVIDER_SLACK};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Instant;

pub const APPROVAL_TTL_HOURS: i64 = 24;
pub const IGNORE_SUPPRESSION_HOURS: i64 = 24;
pub const APPROVE_ACTION_ID: &str = "approve_keyword";
pub const IGNORE_ACTION_ID: &str = "ignore_keyword";

pub fn is_inefficient(term: &SearchTermRow, thresholds: &PerformanceThreshold) -> bool {
    term.cost >= thresholds.min_cost_for_detection
        && term.clicks >= i64::from(thresholds.min_clicks_for_detection)
        && term.conversions == 0.0
}

/// Terms to flag, skipping ones already tracked, recently ignored, or repeated in the batch.
pub fn select_inefficient<'a>(
    terms: &'a [SearchTermRow],
    thresholds: &PerformanceThreshold,
    existing: &HashSet<(String, String)>,
    suppressed: &HashSet<String>,
) -> Vec<&'a SearchTermRow> {
    let mut seen = HashSet::new();

    terms
        .iter()
        .filter(|term| is_inefficient(term, thresholds))
        .filter(|term| !suppressed.contains(&term.search_term))
        .filter(|term| {
            let key = (term.search_term.clone(), term.campaign_id.clone());
            !existing.contains(&key) && seen.insert(key)
        })
        .collect()
}

pub fn suppression_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::hours(IGNORE_SUPPRESSION_HOURS)
}

/// Pulls search terms for the tenant's lookback window and stores new candidates.
pub async fn detect_inefficient_keywords(
    state: &AppState,
    tenant_id: i32,
) -> AppResult<Vec<KeywordCandidate>> {
    let account = run_blocking(&state.pool, move |pool| find_active_ads_account(pool, tenant_id))
        .await?
        .ok_or_else(|| AppError::oauth(PROVIDER_GOOGLE))?;
    let thresholds = run_blocking(&state.pool, move |pool| find_thresholds(pool, tenant_id)).await?;

    let today = Utc::now().date_naive();
    let date_from = today - Duration::days(i64::from(thresholds.lookback_days));

    let access_token = credentials::google_access_token(state, tenant_id).await?;

    let started = Instant::now();
    let terms = state
        .google_ads
        .search_terms(
            &access_token,
            &account.customer_id,
            date_from,
            today,
            thresholds.min_cost_for_detection,
        )
        .await
        .map_err(|e| AppError::from_client(PROVIDER_GOOGLE, e))?;
    METRICS.google_ads_latency.observe(started.elapsed());

    let now = Utc::now();
    let (existing, suppressed) = run_blocking(&state.pool, move |pool| {
        Ok((
            db::blocking_candidate_keys(pool, tenant_id)?,
            db::recently_ignored_terms(pool, tenant_id, suppression_cutoff(now))?,
        ))
    })
    .await?;

    let flagged = select_inefficient(&terms, &thresholds, &existing, &suppressed);
    tracing::info!(
        "Tenant {}: {} search terms checked, {} flagged",
        tenant_id,
        terms.len(),
        flagged.len()
    );
    if flagged.is_empty() {
        return Ok(Vec::new());
    }

    let rows: Vec<SearchTermRow> = flagged.into_iter().cloned().collect();
    let inserted = run_blocking(&state.pool, move |pool| {
        let new_candidates: Vec<NewKeywordCandidate> = rows
            .iter()
            .map(|row| NewKeywordCandidate {
                tenant_id,
                campaign_id: &row.campaign_id,
                campaign_name: Some(row.campaign_name.as_str()).filter(|n| !n.is_empty()),
                search_term: &row.search_term,
                cost: row.cost,
                clicks: i32::try_from(row.clicks).unwrap_or(i32::MAX),
                conversions: row.conversions,
                status: KeywordStatus::Pending.as_str(),
            })
            .collect();
        db::insert_candidates(pool, &new_candidates)
    })
    .await?;

    METRICS.add_keywords_detected(inserted.len() as u64);
    Ok(inserted)
}

/// Slack fallback text and blocks for one candidate. Button values carry the approval id.
pub fn approval_message(lang: &str, candidate: &KeywordCandidate, approval_id: i32) -> (String, Value) {
    let title = t(lang, "keyword.alert_title");
    let campaign = candidate
        .campaign_name
        .as_deref()
        .unwrap_or(&candidate.campaign_id);
    let body = t_with_args(
        lang,
        "keyword.alert_body",
        &[
            &escape(&candidate.search_term),
            &escape(campaign),
            &format_won(candidate.cost),
            &format_count(i64::from(candidate.clicks)),
        ],
    );
    let id = approval_id.to_string();

    let blocks = json!([
        header(&title),
        section(&body),
        actions(
            &format!("keyword_approval_{}", approval_id),
            vec![
                button(
                    APPROVE_ACTION_ID,
                    &t(lang, "keyword.approve_button"),
                    &id,
                    Some("danger"),
                ),
                button(IGNORE_ACTION_ID, &t(lang, "keyword.ignore_button"), &id, None),
            ],
        ),
        context(&t(lang, "keyword.alert_footer")),
    ]);

    (format!("{}: {}", title, candidate.search_term), blocks)
}

/// Opens an approval and posts it. A failed post removes the approval again.
pub async fn create_approval_request(
    state: &AppState,
    tenant: &Tenant,
    candidate: &KeywordCandidate,
) -> AppResult<ApprovalRequest> {
    let channel = tenant
        .slack_channel_id
        .clone()
        .ok_or_else(|| AppError::Validation("slack channel is not configured".into()))?;
    let token = credentials::slack_bot_token(state, tenant)?;

    let candidate_id = candidate.id;
    let expires = Utc::now() + Duration::hours(APPROVAL_TTL_HOURS);
    let mut approval =
        run_blocking(&state.pool, move |pool| db::insert_approval(pool, candidate_id, expires))
            .await?;

    let (text, blocks) = approval_message(DEFAULT_LANG, candidate, approval.id);
    let posted = match state
        .slack
        .post_message(&token, &channel, &text, Some(blocks), None)
        .await
    {
        Ok(posted) => posted,
        Err(e) => {
            tracing::error!(
                "Failed to post approval {} for tenant {}: {}",
                approval.id,
                tenant.id,
                e
            );
            let approval_id = approval.id;
            if let Err(cleanup) =
                run_blocking(&state.pool, move |pool| db::delete_approval(pool, approval_id)).await
            {
                tracing::error!("Failed to remove unposted approval {}: {}", approval_id, cleanup);
            }
            return Err(AppError::from_client(PROVIDER_SLACK, e));
        }
    };

    let approval_id = approval.id;
    let (ts, posted_channel) = (posted.ts.clone(), posted.channel.clone());
    run_blocking(&state.pool, move |pool| {
        db::set_approval_message(pool, approval_id, &ts, &posted_channel)
    })
    .await?;

    approval.slack_message_ts = Some(posted.ts);
    approval.slack_channel_id = Some(posted.channel);
    Ok(approval)
}

/// An approval can be answered once, before it expires.
pub fn check_approvable(approval: &ApprovalRequest, now: DateTime<Utc>) -> AppResult<()> {
    if approval.responded_at.is_some() || approval.action.is_some() {
        return Err(AppError::Validation("approval already processed".into()));
    }
    if approval.expires_at <= now {
        return Err(AppError::ApprovalExpired);
    }
    Ok(())
}

async fn load_open_approval(
    state: &AppState,
    approval_id: i32,
) -> AppResult<(ApprovalRequest, KeywordCandidate)> {
    let (approval, candidate) = run_blocking(&state.pool, move |pool| {
        db::find_approval_with_candidate(pool, approval_id)
    })
    .await?
    .ok_or(AppError::NotFound)?;

    check_approvable(&approval, Utc::now())?;
    Ok((approval, candidate))
}

async fn claim(
    state: &AppState,
    approval_id: i32,
    user_id: &str,
    response: ApprovalAction,
) -> AppResult<()> {
    let user = user_id.to_string();
    let claimed = run_blocking(&state.pool, move |pool| {
        db::claim_approval(pool, approval_id, &user, response, Utc::now())
    })
    .await?;

    if claimed {
        Ok(())
    } else {
        Err(AppError::Validation("approval already processed".into()))
    }
}

/// Adds the candidate's term as a negative keyword. The claim is released if Google Ads fails.
pub async fn approve_keyword(
    state: &AppState,
    approval_id: i32,
    user_id: &str,
) -> AppResult<KeywordCandidate> {
    let (_, mut candidate) = load_open_approval(state, approval_id).await?;

    let tenant_id = candidate.tenant_id;
    let account = run_blocking(&state.pool, move |pool| find_active_ads_account(pool, tenant_id))
        .await?
        .ok_or_else(|| AppError::oauth(PROVIDER_GOOGLE))?;
    let access_token = credentials::google_access_token(state, tenant_id).await?;

    claim(state, approval_id, user_id, ApprovalAction::Approve).await?;

    let result = state
        .google_ads
        .add_negative_keyword(
            &access_token,
            &account.customer_id,
            &candidate.campaign_id,
            &candidate.search_term,
        )
        .await;

    match result {
        Ok(resource) => {
            tracing::info!(
                "Approval {} by {}: added negative keyword '{}' ({})",
                approval_id,
                user_id,
                candidate.search_term,
                resource
            );
        }
        Err(e) => {
            tracing::error!(
                "Failed to add negative keyword for approval {}: {}",
                approval_id,
                e
            );
            if let Err(revert) =
                run_blocking(&state.pool, move |pool| db::release_approval(pool, approval_id)).await
            {
                tracing::error!("Failed to release approval {}: {}", approval_id, revert);
            }
            return Err(AppError::from_client(PROVIDER_GOOGLE, e));
        }
    }

    let candidate_id = candidate.id;
    run_blocking(&state.pool, move |pool| {
        db::set_candidate_status(pool, candidate_id, KeywordStatus::Approved)
    })
    .await?;

    METRICS.record_approval(ApprovalAction::Approve.as_str());
    candidate.status = KeywordStatus::Approved.as_str().to_string();
    Ok(candidate)
}

/// Records an ignore; the term will not be flagged again for a day.
pub async fn reject_keyword(
    state: &AppState,
    approval_id: i32,
    user_id: &str,
) -> AppResult<KeywordCandidate> {
    let (_, mut candidate) = load_open_approval(state, approval_id).await?;

    claim(state, approval_id, user_id, ApprovalAction::Ignore).await?;

    let candidate_id = candidate.id;
    run_blocking(&state.pool, move |pool| {
        db::set_candidate_status(pool, candidate_id, KeywordStatus::Rejected)
    })
    .await?;

    tracing::info!(
        "Approval {} ignored by {}: '{}'",
        approval_id,
        user_id,
        candidate.search_term
    );
    METRICS.record_approval(ApprovalAction::Ignore.as_str());
    candidate.status = KeywordStatus::Rejected.as_str().to_string();
    Ok(candidate)
}

/// Text that replaces the approval message once someone has answered it.
pub fn resolution_text(lang: &str, action: ApprovalAction, user_id: &str, search_term: &str) -> String {
    let key = match action {
        ApprovalAction::Approve => "keyword.approved",
        ApprovalAction::Ignore | ApprovalAction::Expired => "keyword.ignored",
    };
    t_with_args(lang, key, &[user_id, &escape(search_term)])
}

pub async fn suggest_keywords(
    state: &AppState,
    tenant_id: i32,
    seeds: &[String],
    limit: usize,
) -> AppResult<Vec<KeywordIdea>> {
    if seeds.is_empty() {
        return Err(AppError::Validation("seed keywords are required".into()));
    }

    let account = run_blocking(&state.pool, move |pool| find_active_ads_account(pool, tenant_id))
        .await?
        .ok_or_else(|| AppError::oauth(PROVIDER_GOOGLE))?;
    let access_token = credentials::google_access_token(state, tenant_id).await?;

    state
        .google_ads
        .generate_keyword_ideas(&access_token, &account.customer_id, seeds, limit)
        .await
        .map_err(|e| AppError::from_client(PROVIDER_GOOGLE, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(text: &str, campaign: &str, cost: f64, clicks: i64, conversions: f64) -> SearchTermRow {
        SearchTermRow {
            search_term: text.to_string(),
            campaign_id: campaign.to_string(),
            campaign_name: format!("캠페인 {}", campaign),
            cost,
            clicks,
            conversions,
        }
    }

    fn approval(responded: bool, expires_in_hours: i64) -> ApprovalRequest {
        let now = Utc::now();
        ApprovalRequest {
            id: 1,
            keyword_candidate_id: 10,
            slack_message_ts: Some("1700000000.000100".into()),
            slack_channel_id: Some("C1".into()),
            requested_at: now - Duration::hours(1),
            responded_at: responded.then_some(now - Duration::minutes(5)),
            approved_by: responded.then(|| "U1".to_string()),
            action: responded.then(|| "ignore".to_string()),
            expires_at: now + Duration::hours(expires_in_hours),
        }
    }

    fn candidate() -> KeywordCandidate {
        KeywordCandidate {
            id: 10,
            tenant_id: 1,
            campaign_id: "111".into(),
            campaign_name: Some("브랜드".into()),
            search_term: "무료 <샘플>".into(),
            cost: 15000.0,
            clicks: 1234,
            conversions: 0.0,
            detected_at: Utc::now(),
            status: "pending".into(),
        }
    }

    #[test]
    fn test_is_inefficient_requires_all_conditions() {
        let thresholds = PerformanceThreshold::default();

        assert!(is_inefficient(&term("a", "1", 10000.0, 5, 0.0), &thresholds));
        assert!(!is_inefficient(&term("a", "1", 9999.0, 50, 0.0), &thresholds));
        assert!(!is_inefficient(&term("a", "1", 50000.0, 4, 0.0), &thresholds));
        assert!(!is_inefficient(&term("a", "1", 50000.0, 50, 0.5), &thresholds));
    }

    #[test]
    fn test_select_skips_existing_and_duplicates() {
        let thresholds = PerformanceThreshold::default();
        let terms = vec![
            term("shoes", "1", 20000.0, 10, 0.0),
            term("shoes", "1", 20000.0, 10, 0.0),
            term("shoes", "2", 20000.0, 10, 0.0),
            term("boots", "1", 20000.0, 10, 0.0),
            term("cheap", "1", 100.0, 10, 0.0),
        ];
        let existing: HashSet<_> = [("boots".to_string(), "1".to_string())].into_iter().collect();

        let picked = select_inefficient(&terms, &thresholds, &existing, &HashSet::new());
        let keys: Vec<_> = picked
            .iter()
            .map(|t| (t.search_term.as_str(), t.campaign_id.as_str()))
            .collect();
        assert_eq!(keys, vec![("shoes", "1"), ("shoes", "2")]);
    }

    #[test]
    fn test_recently_ignored_terms_are_suppressed() {
        let thresholds = PerformanceThreshold::default();
        let terms = vec![
            term("ignored", "1", 20000.0, 10, 0.0),
            term("fresh", "1", 20000.0, 10, 0.0),
        ];
        let suppressed: HashSet<_> = ["ignored".to_string()].into_iter().collect();

        let picked = select_inefficient(&terms, &thresholds, &HashSet::new(), &suppressed);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].search_term, "fresh");
    }

    #[test]
    fn test_suppression_window_is_one_day() {
        let now = Utc::now();
        let cutoff = suppression_cutoff(now);
        assert_eq!(now - cutoff, Duration::hours(24));
        // An ignore 23 hours ago is inside the window, 25 hours ago is not
        assert!(now - Duration::hours(23) >= cutoff);
        assert!(now - Duration::hours(25) < cutoff);
    }

    #[test]
    fn test_check_approvable() {
        let now = Utc::now();
        assert!(check_approvable(&approval(false, 2), now).is_ok());

        match check_approvable(&approval(true, 2), now) {
            Err(AppError::Validation(_)) => {}
            other => panic!("expected validation error, got {:?}", other),
        }

        match check_approvable(&approval(false, -1), now) {
            Err(AppError::ApprovalExpired) => {}
            other => panic!("expected expired error, got {:?}", other),
        }
    }

    #[test]
    fn test_responded_takes_precedence_over_expired() {
        let now = Utc::now();
        assert!(matches!(
            check_approvable(&approval(true, -1), now),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_approval_message_buttons_carry_approval_id() {
        let (text, blocks) = approval_message("ko", &candidate(), 42);
        assert!(text.contains("무료 <샘플>"));

        let buttons = blocks[2]["elements"].as_array().unwrap();
        assert_eq!(buttons.len(), 2);
        assert_eq!(buttons[0]["action_id"], APPROVE_ACTION_ID);
        assert_eq!(buttons[0]["value"], "42");
        assert_eq!(buttons[1]["action_id"], IGNORE_ACTION_ID);
        assert_eq!(buttons[1]["value"], "42");

        let body = blocks[1]["text"]["text"].as_str().unwrap();
        assert!(body.contains("무료 &lt;샘플&gt;"));
        assert!(body.contains("₩15,000"));
        assert!(body.contains("1,234"));
    }

    #[test]
    fn test_resolution_text() {
        let text = resolution_text("ko", ApprovalAction::Approve, "U1", "shoes");
        assert!(text.contains("<@U1>"));
        assert!(text.contains("shoes"));
        assert!(resolution_text("ko", ApprovalAction::Ignore, "U1", "shoes").contains("무시"));
    }
}
