use crate::db::{run_blocking, DbError};
use crate::ephemeral;
use crate::observability::{ALERTS, METRICS};
use crate::rate_limit::purge_expired_counters;
use crate::state::AppState;
use chrono::Utc;

/// Deletes expired OAuth states, conversation caches and rate-limit windows.
pub async fn run_state_cleanup(state: AppState) {
    let interval = state.config.intervals.state_cleanup;
    tracing::info!("Starting state cleanup (every {:?})...", interval);

    loop {
        match purge(&state).await {
            Ok((0, 0)) => {}
            Ok((states, counters)) => tracing::info!(
                "Purged {} expired states and {} rate-limit counters",
                states,
                counters
            ),
            Err(e) => {
                tracing::error!("Error in state cleanup: {}", e);
                METRICS.increment_errors();
            }
        }
        ALERTS.clear_expired();

        tokio::time::sleep(interval).await;
    }
}

async fn purge(state: &AppState) -> Result<(usize, usize), DbError> {
    run_blocking(&state.pool, |pool| {
        let now = Utc::now();
        Ok((
            ephemeral::purge_expired(pool, now)?,
            purge_expired_counters(pool, now)?,
        ))
    })
    .await
}
