use crate::db::{DbError, PgPool};
use crate::models::{
    NewReportHistory, NewReportSchedule, ReportHistory, ReportSchedule, ReportScheduleChanges,
};
use chrono::{DateTime, NaiveTime, Utc};
use diesel::prelude::*;

pub fn find_active_schedules(pool: &PgPool) -> Result<Vec<ReportSchedule>, DbError> {
    use crate::schema::report_schedules::dsl::*;

    let conn = &mut pool.get()?;
    Ok(report_schedules
        .filter(is_active.eq(true))
        .filter(frequency.ne("disabled"))
        .select(ReportSchedule::as_select())
        .load(conn)?)
}

/// Moves `last_triggered_at` into the slot. Returns false when another poll already did.
pub fn claim_schedule_slot(
    pool: &PgPool,
    schedule_id: i32,
    slot_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<bool, DbError> {
    use crate::schema::report_schedules::dsl::*;

    let conn = &mut pool.get()?;
    let updated = diesel::update(
        report_schedules
            .filter(id.eq(schedule_id))
            .filter(last_triggered_at.is_null().or(last_triggered_at.lt(slot_start))),
    )
    .set(last_triggered_at.eq(Some(now)))
    .execute(conn)?;

    Ok(updated == 1)
}

pub fn find_schedule(pool: &PgPool, tenant: i32) -> Result<Option<ReportSchedule>, DbError> {
    use crate::schema::report_schedules::dsl::*;

    let conn = &mut pool.get()?;
    Ok(report_schedules
        .filter(tenant_id.eq(tenant))
        .select(ReportSchedule::as_select())
        .first(conn)
        .optional()?)
}

/// Weekly on Monday at 09:00 Seoul time.
pub fn default_schedule(tenant: i32) -> NewReportSchedule<'static> {
    NewReportSchedule {
        tenant_id: tenant,
        frequency: "weekly",
        day_of_week: Some(0),
        day_of_month: None,
        time_of_day: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
        timezone: "Asia/Seoul",
        is_active: true,
    }
}

pub fn get_or_create_schedule(pool: &PgPool, tenant: i32) -> Result<ReportSchedule, DbError> {
    use crate::schema::report_schedules::dsl::*;

    let conn = &mut pool.get()?;
    diesel::insert_into(report_schedules)
        .values(&default_schedule(tenant))
        .on_conflict(tenant_id)
        .do_nothing()
        .execute(conn)?;

    Ok(report_schedules
        .filter(tenant_id.eq(tenant))
        .select(ReportSchedule::as_select())
        .first(conn)?)
}

pub fn update_schedule(
    pool: &PgPool,
    tenant: i32,
    mut changes: ReportScheduleChanges,
) -> Result<ReportSchedule, DbError> {
    use crate::schema::report_schedules::dsl::*;

    let current = get_or_create_schedule(pool, tenant)?;
    changes.updated_at = Some(Utc::now());

    let conn = &mut pool.get()?;
    Ok(diesel::update(report_schedules.find(current.id))
        .set(&changes)
        .returning(ReportSchedule::as_returning())
        .get_result(conn)?)
}

pub fn insert_report_history(
    pool: &PgPool,
    report: NewReportHistory,
) -> Result<ReportHistory, DbError> {
    use crate::schema::report_history::dsl::*;

    let conn = &mut pool.get()?;
    Ok(diesel::insert_into(report_history)
        .values(&report)
        .returning(ReportHistory::as_returning())
        .get_result(conn)?)
}

pub fn list_reports(
    pool: &PgPool,
    tenant: i32,
    limit: i64,
    offset: i64,
) -> Result<Vec<ReportHistory>, DbError> {
    use crate::schema::report_history::dsl::*;

    let conn = &mut pool.get()?;
    Ok(report_history
        .filter(tenant_id.eq(tenant))
        .order(created_at.desc())
        .limit(limit)
        .offset(offset)
        .select(ReportHistory::as_select())
        .load(conn)?)
}

pub fn find_report(pool: &PgPool, report_id: i32) -> Result<Option<ReportHistory>, DbError> {
    use crate::schema::report_history::dsl::*;

    let conn = &mut pool.get()?;
    Ok(report_history
        .find(report_id)
        .select(ReportHistory::as_select())
        .first(conn)
        .optional()?)
}

/// Costs of the tenant's most recent reports, oldest first.
pub fn recent_report_costs(pool: &PgPool, tenant: i32, count: i64) -> Result<Vec<f64>, DbError> {
    use crate::schema::report_history::dsl::*;

    let conn = &mut pool.get()?;
    let rows: Vec<serde_json::Value> = report_history
        .filter(tenant_id.eq(tenant))
        .order(created_at.desc())
        .limit(count)
        .select(metrics)
        .load(conn)?;

    Ok(rows
        .iter()
        .rev()
        .filter_map(|m| m["current"]["cost"].as_f64())
        .collect())
}
