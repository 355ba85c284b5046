use crate::db::{DbError, PgPool};
use crate::models::{
    ApprovalAction, ApprovalRequest, KeywordCandidate, KeywordStatus, NewApprovalRequest,
    NewKeywordCandidate,
};
use crate::schema::{approval_requests, keyword_candidates};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use std::collections::HashSet;

/// (search_term, campaign_id) pairs that must not be flagged again: pending or approved candidates.
pub fn blocking_candidate_keys(
    pool: &PgPool,
    tenant: i32,
) -> Result<HashSet<(String, String)>, DbError> {
    let conn = &mut pool.get()?;

    let rows: Vec<(String, String)> = keyword_candidates::table
        .filter(keyword_candidates::tenant_id.eq(tenant))
        .filter(keyword_candidates::status.eq_any([
            KeywordStatus::Pending.as_str(),
            KeywordStatus::Approved.as_str(),
        ]))
        .select((keyword_candidates::search_term, keyword_candidates::campaign_id))
        .load(conn)?;

    Ok(rows.into_iter().collect())
}

/// Search terms a user chose to ignore at or after `since`.
pub fn recently_ignored_terms(
    pool: &PgPool,
    tenant: i32,
    since: DateTime<Utc>,
) -> Result<HashSet<String>, DbError> {
    let conn = &mut pool.get()?;

    let terms: Vec<String> = approval_requests::table
        .inner_join(keyword_candidates::table)
        .filter(keyword_candidates::tenant_id.eq(tenant))
        .filter(approval_requests::action.eq(ApprovalAction::Ignore.as_str()))
        .filter(approval_requests::responded_at.ge(since))
        .select(keyword_candidates::search_term)
        .load(conn)?;

    Ok(terms.into_iter().collect())
}

pub fn insert_candidates(
    pool: &PgPool,
    candidates: &[NewKeywordCandidate],
) -> Result<Vec<KeywordCandidate>, DbError> {
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let conn = &mut pool.get()?;
    Ok(diesel::insert_into(keyword_candidates::table)
        .values(candidates)
        .returning(KeywordCandidate::as_returning())
        .get_results(conn)?)
}

/// Pending candidates with no approval row, e.g. fresh detections or ones whose Slack post failed.
pub fn find_unrequested_candidates(
    pool: &PgPool,
    tenant: i32,
) -> Result<Vec<KeywordCandidate>, DbError> {
    let conn = &mut pool.get()?;

    Ok(keyword_candidates::table
        .left_join(approval_requests::table)
        .filter(keyword_candidates::tenant_id.eq(tenant))
        .filter(keyword_candidates::status.eq(KeywordStatus::Pending.as_str()))
        .filter(approval_requests::id.nullable().is_null())
        .order(keyword_candidates::cost.desc())
        .select(KeywordCandidate::as_select())
        .load(conn)?)
}

pub fn list_candidates(
    pool: &PgPool,
    tenant: i32,
    status_filter: Option<KeywordStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<KeywordCandidate>, DbError> {
    let conn = &mut pool.get()?;

    let mut query = keyword_candidates::table
        .filter(keyword_candidates::tenant_id.eq(tenant))
        .into_boxed();
    if let Some(wanted) = status_filter {
        query = query.filter(keyword_candidates::status.eq(wanted.as_str()));
    }

    Ok(query
        .order(keyword_candidates::detected_at.desc())
        .limit(limit)
        .offset(offset)
        .select(KeywordCandidate::as_select())
        .load(conn)?)
}

pub fn find_candidate(pool: &PgPool, candidate_id: i32) -> Result<Option<KeywordCandidate>, DbError> {
    let conn = &mut pool.get()?;
    Ok(keyword_candidates::table
        .find(candidate_id)
        .select(KeywordCandidate::as_select())
        .first(conn)
        .optional()?)
}

pub fn set_candidate_status(
    pool: &PgPool,
    candidate_id: i32,
    new_status: KeywordStatus,
) -> Result<(), DbError> {
    let conn = &mut pool.get()?;
    diesel::update(keyword_candidates::table.find(candidate_id))
        .set(keyword_candidates::status.eq(new_status.as_str()))
        .execute(conn)?;
    Ok(())
}

pub fn insert_approval(
    pool: &PgPool,
    candidate_id: i32,
    expires: DateTime<Utc>,
) -> Result<ApprovalRequest, DbError> {
    let conn = &mut pool.get()?;
    Ok(diesel::insert_into(approval_requests::table)
        .values(&NewApprovalRequest {
            keyword_candidate_id: candidate_id,
            expires_at: expires,
        })
        .returning(ApprovalRequest::as_returning())
        .get_result(conn)?)
}

pub fn delete_approval(pool: &PgPool, approval_id: i32) -> Result<(), DbError> {
    let conn = &mut pool.get()?;
    diesel::delete(approval_requests::table.find(approval_id)).execute(conn)?;
    Ok(())
}

pub fn set_approval_message(
    pool: &PgPool,
    approval_id: i32,
    ts: &str,
    channel: &str,
) -> Result<(), DbError> {
    let conn = &mut pool.get()?;
    diesel::update(approval_requests::table.find(approval_id))
        .set((
            approval_requests::slack_message_ts.eq(ts),
            approval_requests::slack_channel_id.eq(channel),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn find_approval_with_candidate(
    pool: &PgPool,
    approval_id: i32,
) -> Result<Option<(ApprovalRequest, KeywordCandidate)>, DbError> {
    let conn = &mut pool.get()?;
    Ok(approval_requests::table
        .inner_join(keyword_candidates::table)
        .filter(approval_requests::id.eq(approval_id))
        .select((ApprovalRequest::as_select(), KeywordCandidate::as_select()))
        .first(conn)
        .optional()?)
}

/// Records the response only while the approval is open. Returns false when it was not.
pub fn claim_approval(
    pool: &PgPool,
    approval_id: i32,
    user: &str,
    response: ApprovalAction,
    now: DateTime<Utc>,
) -> Result<bool, DbError> {
    let conn = &mut pool.get()?;

    let updated = diesel::update(
        approval_requests::table
            .filter(approval_requests::id.eq(approval_id))
            .filter(approval_requests::responded_at.is_null())
            .filter(approval_requests::expires_at.gt(now)),
    )
    .set((
        approval_requests::responded_at.eq(Some(now)),
        approval_requests::approved_by.eq(Some(user)),
        approval_requests::action.eq(Some(response.as_str())),
    ))
    .execute(conn)?;

    Ok(updated == 1)
}

/// Reopens a claimed approval after the follow-up work failed.
pub fn release_approval(pool: &PgPool, approval_id: i32) -> Result<(), DbError> {
    let conn = &mut pool.get()?;
    diesel::update(approval_requests::table.find(approval_id))
        .set((
            approval_requests::responded_at.eq(None::<DateTime<Utc>>),
            approval_requests::approved_by.eq(None::<String>),
            approval_requests::action.eq(None::<String>),
        ))
        .execute(conn)?;
    Ok(())
}

/// Marks open approvals past their deadline as expired, along with their pending candidates.
pub fn expire_stale_approvals(pool: &PgPool, now: DateTime<Utc>) -> Result<usize, DbError> {
    let conn = &mut pool.get()?;

    conn.transaction(|conn| {
        let candidate_ids: Vec<i32> = diesel::update(
            approval_requests::table
                .filter(approval_requests::action.is_null())
                .filter(approval_requests::responded_at.is_null())
                .filter(approval_requests::expires_at.le(now)),
        )
        .set((
            approval_requests::action.eq(Some(ApprovalAction::Expired.as_str())),
            approval_requests::responded_at.eq(Some(now)),
        ))
        .returning(approval_requests::keyword_candidate_id)
        .get_results(conn)?;

        if !candidate_ids.is_empty() {
            diesel::update(
                keyword_candidates::table
                    .filter(keyword_candidates::id.eq_any(&candidate_ids))
                    .filter(keyword_candidates::status.eq(KeywordStatus::Pending.as_str())),
            )
            .set(keyword_candidates::status.eq(KeywordStatus::Expired.as_str()))
            .execute(conn)?;
        }

        Ok(candidate_ids.len())
    })
}
