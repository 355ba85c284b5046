use super::period::{period_for, ReportType};
use super::schedule::{is_due, local_today, slot_start};
use super::{db, generate_report, ReportRequest};
use crate::db::run_blocking;
use crate::observability::alerts::Severity;
use crate::observability::{ALERTS, METRICS};
use crate::state::AppState;
use chrono::Utc;

pub async fn run_report_scheduler(state: AppState) {
    let interval = state.config.intervals.report_check;
    tracing::info!("Starting report scheduler (every {:?})...", interval);

    loop {
        if let Err(e) = check_due_reports(&state).await {
            tracing::error!("Error in report scheduler: {}", e);
            METRICS.increment_errors();
            ALERTS
                .send_alert(
                    &state.slack,
                    Severity::Error,
                    "ReportScheduler",
                    &format!("Failed to check report schedules: {}", e),
                )
                .await;
        }

        tokio::time::sleep(interval).await;
    }
}

async fn check_due_reports(state: &AppState) -> Result<(), crate::db::DbError> {
    let now = Utc::now();
    let schedules = run_blocking(&state.pool, db::find_active_schedules).await?;

    let due: Vec<_> = schedules.into_iter().filter(|s| is_due(s, now)).collect();
    if due.is_empty() {
        return Ok(());
    }

    tracing::info!("Found {} due report schedules", due.len());

    for schedule in due {
        let Some(report_type) = ReportType::from_frequency(schedule.frequency()) else {
            continue;
        };

        let slot = slot_start(&schedule, now);
        let schedule_id = schedule.id;
        let claimed = run_blocking(&state.pool, move |pool| {
            db::claim_schedule_slot(pool, schedule_id, slot, now)
        })
        .await?;

        if !claimed {
            tracing::debug!("Schedule {} already fired for slot {}", schedule_id, slot);
            continue;
        }

        tracing::info!(
            "Schedule {} is due, generating {} report for tenant {}",
            schedule_id,
            report_type.as_str(),
            schedule.tenant_id
        );

        let request = ReportRequest {
            tenant_id: schedule.tenant_id,
            report_type,
            period: Some(period_for(report_type, local_today(&schedule, now))),
            campaign_ids: schedule.campaign_ids.clone(),
        };

        if let Err(e) = generate_report(state, request).await {
            ALERTS
                .send_alert(
                    &state.slack,
                    Severity::Warning,
                    "ReportScheduler",
                    &format!(
                        "Scheduled report failed for tenant {}: {}",
                        schedule.tenant_id, e
                    ),
                )
                .await;
        }
    }

    Ok(())
}
