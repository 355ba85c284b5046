//! Decrypts stored credentials and turns them into usable access tokens.

use crate::clients::google_oauth::still_valid;
use crate::db::run_blocking;
use crate::error::{AppError, AppResult};
use crate::models::{OAuthToken, SearchConsoleAccount, Tenant};
use crate::state::AppState;
use crate::{find_oauth_token, PROVIDER_GOOGLE};
use chrono::Utc;

pub fn google_cache_key(tenant_id: i32) -> String {
    format!("google:{}", tenant_id)
}

pub fn gsc_cache_key(account_id: i32) -> String {
    format!("gsc:{}", account_id)
}

/// Google Ads access token for the tenant, refreshed through the stored refresh token.
pub async fn google_access_token(state: &AppState, tenant_id: i32) -> AppResult<String> {
    let token = run_blocking(&state.pool, move |pool| {
        find_oauth_token(pool, tenant_id, PROVIDER_GOOGLE)
    })
    .await?
    .ok_or_else(|| AppError::oauth(PROVIDER_GOOGLE))?;

    let sealed = token
        .refresh_token
        .as_deref()
        .ok_or_else(|| AppError::oauth(PROVIDER_GOOGLE))?;
    let refresh_token = state.cipher.open(sealed).map_err(|e| {
        tracing::error!("Failed to decrypt refresh token for tenant {}: {}", tenant_id, e);
        AppError::InvalidToken
    })?;

    let key = google_cache_key(tenant_id);
    seed_from_store(state, &key, &token);
    state
        .google_oauth
        .access_token(&key, &refresh_token)
        .await
        .map_err(|e| {
            state.google_oauth.invalidate(&key);
            AppError::from_client(PROVIDER_GOOGLE, e)
        })
}

/// Puts the stored access token in the cache while it is still valid, so a restart does not
/// force a refresh.
fn seed_from_store(state: &AppState, key: &str, token: &OAuthToken) {
    let Some(expires_at) = token.expires_at.filter(|e| still_valid(*e, Utc::now())) else {
        return;
    };
    match state.cipher.open(&token.access_token) {
        Ok(access_token) => state.google_oauth.remember(key, &access_token, expires_at),
        Err(e) => tracing::warn!(
            "Stored access token for tenant {} is unreadable: {}",
            token.tenant_id,
            e
        ),
    }
}

pub async fn gsc_access_token(state: &AppState, account: &SearchConsoleAccount) -> AppResult<String> {
    let sealed = account
        .refresh_token
        .as_deref()
        .ok_or_else(|| AppError::oauth("gsc"))?;
    let refresh_token = state
        .cipher
        .open(sealed)
        .map_err(|_| AppError::InvalidToken)?;

    let key = gsc_cache_key(account.id);
    state
        .google_oauth
        .access_token(&key, &refresh_token)
        .await
        .map_err(|e| {
            state.google_oauth.invalidate(&key);
            AppError::from_client("gsc", e)
        })
}

/// The tenant's own bot token, else the app-wide one.
pub fn slack_bot_token(state: &AppState, tenant: &Tenant) -> AppResult<String> {
    if let Some(sealed) = tenant.bot_token.as_deref() {
        return state.cipher.open(sealed).map_err(|e| {
            tracing::error!("Failed to decrypt bot token for tenant {}: {}", tenant.id, e);
            AppError::InvalidToken
        });
    }

    state
        .config
        .slack_bot_token
        .clone()
        .ok_or_else(|| AppError::oauth("slack"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_keys_do_not_collide() {
        assert_eq!(google_cache_key(7), "google:7");
        assert_eq!(gsc_cache_key(7), "gsc:7");
    }
}
