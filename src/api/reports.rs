use super::Pagination;
use crate::db::run_blocking;
use crate::error::{AppError, AppResult};
use crate::models::ReportHistory;
use crate::services::reports::period::{ReportPeriod, ReportType};
use crate::services::reports::{self, db as report_db, ReportRequest};
use crate::state::AppState;
use actix_web::{get, post, web, HttpResponse};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct GenerateReportBody {
    pub tenant_id: i32,
    pub report_type: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub campaign_ids: Option<Vec<String>>,
}

impl GenerateReportBody {
    /// An explicit date range makes the report custom; otherwise the type picks the period.
    pub fn into_request(self) -> AppResult<ReportRequest> {
        let period = match (self.date_from, self.date_to) {
            (Some(from), Some(to)) if from > to => {
                return Err(AppError::Validation("date_from is after date_to".into()))
            }
            (Some(from), Some(to)) => Some(ReportPeriod::new(from, to)),
            (None, None) => None,
            _ => {
                return Err(AppError::Validation(
                    "date_from and date_to must be given together".into(),
                ))
            }
        };

        let report_type = match (&self.report_type, period) {
            (_, Some(_)) => ReportType::Custom,
            (Some(name), None) => ReportType::parse(name)
                .filter(|t| *t != ReportType::Custom)
                .ok_or_else(|| AppError::Validation(format!("unknown report_type: {}", name)))?,
            (None, None) => ReportType::Weekly,
        };

        Ok(ReportRequest {
            tenant_id: self.tenant_id,
            report_type,
            period,
            campaign_ids: self.campaign_ids.filter(|ids| !ids.is_empty()),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ReportResponse {
    pub report_id: i32,
    pub tenant_id: i32,
    pub report_type: String,
    pub period: String,
    pub metrics: serde_json::Value,
    pub insight: String,
    pub slack_message_ts: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<ReportHistory> for ReportResponse {
    fn from(report: ReportHistory) -> Self {
        Self {
            report_id: report.id,
            tenant_id: report.tenant_id,
            report_type: report.report_type,
            period: format!("{} ~ {}", report.period_start, report.period_end),
            metrics: report.metrics,
            insight: report.gemini_insight.unwrap_or_default(),
            slack_message_ts: report.slack_message_ts,
            created_at: report.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListReportsQuery {
    pub tenant_id: i32,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[post("/api/v1/reports/generate")]
pub async fn generate(
    state: web::Data<AppState>,
    body: web::Json<GenerateReportBody>,
) -> Result<HttpResponse, AppError> {
    let request = body.into_inner().into_request()?;
    let report = reports::generate_report(&state, request).await?;
    Ok(HttpResponse::Created().json(ReportResponse::from(report)))
}

#[get("/api/v1/reports")]
pub async fn list(
    state: web::Data<AppState>,
    query: web::Query<ListReportsQuery>,
) -> Result<HttpResponse, AppError> {
    let tenant_id = query.tenant_id;
    let (limit, offset) = Pagination {
        limit: query.limit,
        offset: query.offset,
    }
    .resolve();

    let reports = run_blocking(&state.pool, move |pool| {
        report_db::list_reports(pool, tenant_id, limit, offset)
    })
    .await?;

    let body: Vec<ReportResponse> = reports.into_iter().map(ReportResponse::from).collect();
    Ok(HttpResponse::Ok().json(body))
}

#[get("/api/v1/reports/{report_id}")]
pub async fn get(
    state: web::Data<AppState>,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let report_id = path.into_inner();
    let report = run_blocking(&state.pool, move |pool| report_db::find_report(pool, report_id))
        .await?
        .ok_or(AppError::NotFound)?;

    Ok(HttpResponse::Ok().json(ReportResponse::from(report)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(report_type: Option<&str>, from: Option<&str>, to: Option<&str>) -> GenerateReportBody {
        GenerateReportBody {
            tenant_id: 1,
            report_type: report_type.map(String::from),
            date_from: from.map(|d| d.parse().unwrap()),
            date_to: to.map(|d| d.parse().unwrap()),
            campaign_ids: Some(vec![]),
        }
    }

    #[test]
    fn test_defaults_to_weekly() {
        let request = body(None, None, None).into_request().unwrap();
        assert_eq!(request.report_type, ReportType::Weekly);
        assert!(request.period.is_none());
        assert!(request.campaign_ids.is_none());
    }

    #[test]
    fn test_date_range_makes_custom_report() {
        let request = body(Some("daily"), Some("2025-01-01"), Some("2025-01-15"))
            .into_request()
            .unwrap();
        assert_eq!(request.report_type, ReportType::Custom);
        assert_eq!(request.period.unwrap().days(), 15);
    }

    #[test]
    fn test_invalid_ranges_rejected() {
        assert!(body(None, Some("2025-02-01"), Some("2025-01-01"))
            .into_request()
            .is_err());
        assert!(body(None, Some("2025-02-01"), None).into_request().is_err());
        assert!(body(Some("custom"), None, None).into_request().is_err());
        assert!(body(Some("hourly"), None, None).into_request().is_err());
    }
}
