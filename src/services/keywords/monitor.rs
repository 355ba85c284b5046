use super::{create_approval_request, db, detect_inefficient_keywords};
use crate::db::{run_blocking, DbError};
use crate::error::{AppError, AppResult};
use crate::find_active_tenants;
use crate::models::{ApprovalAction, Tenant};
use crate::observability::alerts::Severity;
use crate::observability::{ALERTS, METRICS};
use crate::state::AppState;
use chrono::Utc;
use std::future::Future;

pub async fn run_keyword_monitor(state: AppState) {
    let interval = state.config.intervals.keyword_detection;
    tracing::info!("Starting keyword monitor (every {:?})...", interval);

    loop {
        if let Err(e) = check_all_tenants(&state).await {
            tracing::error!("Error in keyword monitor: {}", e);
            METRICS.increment_errors();
            ALERTS
                .send_alert(
                    &state.slack,
                    Severity::Error,
                    "KeywordMonitor",
                    &format!("Failed to load tenants for keyword detection: {}", e),
                )
                .await;
        }

        tokio::time::sleep(interval).await;
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub detected: usize,
    pub requested: usize,
    pub failed: usize,
}

/// Runs `check` for every tenant in turn. A failing tenant is counted and skipped.
async fn sweep<T, F, Fut>(tenants: Vec<T>, mut check: F) -> SweepSummary
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = AppResult<(usize, usize)>>,
{
    let mut summary = SweepSummary::default();
    for tenant in tenants {
        match check(tenant).await {
            Ok((detected, requested)) => {
                summary.detected += detected;
                summary.requested += requested;
            }
            Err(_) => summary.failed += 1,
        }
    }
    summary
}

async fn check_tenant(state: &AppState, tenant: Tenant) -> AppResult<(usize, usize)> {
    let detected = detect_inefficient_keywords(state, tenant.id)
        .await
        .map_err(|e| {
            tracing::warn!("Keyword detection skipped for tenant {}: {}", tenant.id, e);
            e
        })?
        .len();

    let requested = request_approvals(state, &tenant).await.map_err(|e| {
        tracing::warn!("Approval requests skipped for tenant {}: {}", tenant.id, e);
        METRICS.increment_errors();
        AppError::from(e)
    })?;

    Ok((detected, requested))
}

async fn check_all_tenants(state: &AppState) -> Result<(), DbError> {
    let tenants = run_blocking(&state.pool, find_active_tenants).await?;
    tracing::debug!("Checking search terms for {} tenants", tenants.len());

    let summary = sweep(tenants, |tenant| check_tenant(state, tenant)).await;

    if summary.detected > 0 || summary.requested > 0 || summary.failed > 0 {
        tracing::info!(
            "Keyword detection finished: {} detected, {} approval requests sent, {} tenants failed",
            summary.detected,
            summary.requested,
            summary.failed
        );
    }
    Ok(())
}

/// Posts an approval for every pending candidate that does not have one yet.
async fn request_approvals(state: &AppState, tenant: &Tenant) -> Result<usize, DbError> {
    let tenant_id = tenant.id;
    let candidates =
        run_blocking(&state.pool, move |pool| db::find_unrequested_candidates(pool, tenant_id))
            .await?;

    let mut sent = 0;
    for candidate in &candidates {
        match create_approval_request(state, tenant, candidate).await {
            Ok(approval) => {
                sent += 1;
                tracing::info!(
                    "Approval {} sent for '{}' (tenant {})",
                    approval.id,
                    candidate.search_term,
                    tenant_id
                );
            }
            Err(e) => {
                tracing::warn!(
                    "Approval request for candidate {} failed, will retry next run: {}",
                    candidate.id,
                    e
                );
            }
        }
    }
    Ok(sent)
}

pub async fn run_approval_expiry(state: AppState) {
    let interval = state.config.intervals.approval_expiry;
    tracing::info!("Starting approval expiry sweep (every {:?})...", interval);

    loop {
        match run_blocking(&state.pool, |pool| db::expire_stale_approvals(pool, Utc::now())).await {
            Ok(0) => {}
            Ok(expired) => {
                tracing::info!("Expired {} approval requests", expired);
                for _ in 0..expired {
                    METRICS.record_approval(ApprovalAction::Expired.as_str());
                }
            }
            Err(e) => {
                tracing::error!("Error expiring approval requests: {}", e);
                METRICS.increment_errors();
                ALERTS
                    .send_alert(
                        &state.slack,
                        Severity::Warning,
                        "ApprovalExpiry",
                        &format!("Failed to expire approval requests: {}", e),
                    )
                    .await;
            }
        }

        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sweep_continues_after_a_tenant_fails() {
        let mut visited = Vec::new();
        let summary = sweep(vec![1, 2, 3], |tenant_id| {
            visited.push(tenant_id);
            async move {
                if tenant_id == 1 {
                    Err(AppError::from(DbError::TaskJoinError("pool timed out".into())))
                } else {
                    Ok((2, 1))
                }
            }
        })
        .await;

        assert_eq!(visited, vec![1, 2, 3]);
        assert_eq!(
            summary,
            SweepSummary {
                detected: 4,
                requested: 2,
                failed: 1,
            }
        );
    }
}
