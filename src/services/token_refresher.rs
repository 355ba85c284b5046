use crate::db::{run_blocking, DbError};
use crate::models::OAuthToken;
use crate::observability::alerts::Severity;
use crate::observability::{ALERTS, METRICS};
use crate::services::credentials::google_cache_key;
use crate::state::AppState;
use crate::{find_tokens_expiring_before, update_access_token, PROVIDER_GOOGLE};
use chrono::{Duration, Utc};

/// Tokens expiring within this window are refreshed ahead of time.
const REFRESH_AHEAD_HOURS: i64 = 24;

pub async fn run_token_refresher(state: AppState) {
    let interval = state.config.intervals.token_refresh;
    tracing::info!("Starting token refresher (every {:?})...", interval);

    loop {
        if let Err(e) = refresh_expiring_tokens(&state).await {
            tracing::error!("Error in token refresher: {}", e);
            METRICS.increment_errors();
            ALERTS
                .send_alert(
                    &state.slack,
                    Severity::Error,
                    "TokenRefresher",
                    &format!("Failed to load expiring tokens: {}", e),
                )
                .await;
        }

        tokio::time::sleep(interval).await;
    }
}

async fn refresh_expiring_tokens(state: &AppState) -> Result<(), DbError> {
    let cutoff = Utc::now() + Duration::hours(REFRESH_AHEAD_HOURS);
    let tokens = run_blocking(&state.pool, move |pool| {
        find_tokens_expiring_before(pool, PROVIDER_GOOGLE, cutoff)
    })
    .await?;

    if tokens.is_empty() {
        return Ok(());
    }

    let total = tokens.len();
    let mut refreshed = 0;
    for token in tokens {
        match refresh_token(state, &token).await {
            Ok(()) => {
                refreshed += 1;
                METRICS.record_token_refresh(true);
            }
            Err(e) => {
                METRICS.record_token_refresh(false);
                tracing::error!("Failed to refresh token for tenant {}: {}", token.tenant_id, e);
            }
        }
    }

    tracing::info!("Token refresh complete: {} of {} refreshed", refreshed, total);
    if refreshed < total {
        ALERTS
            .send_alert(
                &state.slack,
                Severity::Warning,
                "TokenRefresher",
                &format!("{} of {} Google tokens failed to refresh", total - refreshed, total),
            )
            .await;
    }
    Ok(())
}

async fn refresh_token(state: &AppState, token: &OAuthToken) -> anyhow::Result<()> {
    let sealed = token
        .refresh_token
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("no refresh token stored"))?;
    let refresh_token = state.cipher.open(sealed)?;

    let response = state.google_oauth.refresh(&refresh_token).await?;
    let sealed_access = state.cipher.seal(&response.access_token)?;
    let expiry = response.expires_at(Utc::now());

    let token_id = token.id;
    run_blocking(&state.pool, move |pool| {
        update_access_token(pool, token_id, &sealed_access, expiry)
    })
    .await?;

    state.google_oauth.remember(
        &google_cache_key(token.tenant_id),
        &response.access_token,
        expiry,
    );
    tracing::debug!("Refreshed Google token for tenant {}", token.tenant_id);
    Ok(())
}
