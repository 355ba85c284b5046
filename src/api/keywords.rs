use super::Pagination;
use crate::db::run_blocking;
use crate::error::{AppError, AppResult};
use crate::models::{ApprovalRequest, KeywordStatus};
use crate::services::keywords::{self, db as keyword_db};
use crate::state::AppState;
use actix_web::{get, post, web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ListKeywordsQuery {
    pub tenant_id: i32,
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub fn parse_status_filter(status: Option<&str>) -> AppResult<Option<KeywordStatus>> {
    match status.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(raw) => KeywordStatus::parse(raw).map(Some).ok_or_else(|| {
            AppError::Validation(format!(
                "invalid status {}: expected pending, approved, rejected or expired",
                raw
            ))
        }),
    }
}

#[derive(Debug, Deserialize)]
pub struct ApprovalQuery {
    pub slack_user_id: String,
}

#[derive(Debug, Serialize)]
pub struct ApprovalResponse {
    pub id: i32,
    pub keyword_candidate_id: i32,
    pub status: &'static str,
    pub slack_message_ts: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
}

impl ApprovalResponse {
    fn new(approval: ApprovalRequest, status: KeywordStatus) -> Self {
        Self {
            id: approval.id,
            keyword_candidate_id: approval.keyword_candidate_id,
            status: status.as_str(),
            slack_message_ts: approval.slack_message_ts,
            requested_at: approval.requested_at,
            expires_at: approval.expires_at,
            responded_at: approval.responded_at,
            approved_by: approval.approved_by,
        }
    }
}

#[get("/api/v1/keywords")]
pub async fn list(
    state: web::Data<AppState>,
    query: web::Query<ListKeywordsQuery>,
) -> Result<HttpResponse, AppError> {
    let status = parse_status_filter(query.status.as_deref())?;
    let tenant_id = query.tenant_id;
    let (limit, offset) = Pagination {
        limit: query.limit,
        offset: query.offset,
    }
    .resolve();

    let candidates = run_blocking(&state.pool, move |pool| {
        keyword_db::list_candidates(pool, tenant_id, status, limit, offset)
    })
    .await?;

    Ok(HttpResponse::Ok().json(candidates))
}

#[get("/api/v1/keywords/{keyword_id}")]
pub async fn get(
    state: web::Data<AppState>,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let keyword_id = path.into_inner();
    let candidate = run_blocking(&state.pool, move |pool| {
        keyword_db::find_candidate(pool, keyword_id)
    })
    .await?
    .ok_or(AppError::NotFound)?;

    Ok(HttpResponse::Ok().json(candidate))
}

async fn approval_after(
    state: &AppState,
    approval_id: i32,
    status: KeywordStatus,
) -> Result<HttpResponse, AppError> {
    let (approval, _) = run_blocking(&state.pool, move |pool| {
        keyword_db::find_approval_with_candidate(pool, approval_id)
    })
    .await?
    .ok_or(AppError::NotFound)?;

    Ok(HttpResponse::Ok().json(ApprovalResponse::new(approval, status)))
}

#[post("/api/v1/approvals/{approval_id}/approve")]
pub async fn approve(
    state: web::Data<AppState>,
    path: web::Path<i32>,
    query: web::Query<ApprovalQuery>,
) -> Result<HttpResponse, AppError> {
    let approval_id = path.into_inner();
    keywords::approve_keyword(&state, approval_id, &query.slack_user_id).await?;
    approval_after(&state, approval_id, KeywordStatus::Approved).await
}

#[post("/api/v1/approvals/{approval_id}/reject")]
pub async fn reject(
    state: web::Data<AppState>,
    path: web::Path<i32>,
    query: web::Query<ApprovalQuery>,
) -> Result<HttpResponse, AppError> {
    let approval_id = path.into_inner();
    keywords::reject_keyword(&state, approval_id, &query.slack_user_id).await?;
    approval_after(&state, approval_id, KeywordStatus::Rejected).await
}
