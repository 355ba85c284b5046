//! Authorization flows for Google Ads, Search Console and the Slack app install.
//!
//! Each flow starts by storing a one-time state value for ten minutes. The callback consumes
//! it before anything else, so a state can complete at most one exchange.

use crate::clients::google_oauth::{ADWORDS_SCOPE, WEBMASTERS_SCOPE};
use crate::clients::slack;
use crate::clients::ClientError;
use crate::db::run_blocking;
use crate::ephemeral::{self, oauth_state_key, OAUTH_STATE_TTL_SECS};
use crate::error::{AppError, AppResult};
use crate::models::{
    GoogleAdsAccount, NewGoogleAdsAccount, NewOAuthToken, NewSearchConsoleAccount,
    SearchConsoleAccount, Tenant,
};
use crate::security::generate_state_token;
use crate::services::credentials::{google_cache_key, gsc_cache_key};
use crate::state::AppState;
use crate::{
    replace_ads_accounts, upsert_oauth_token, upsert_search_console_account,
    upsert_tenant_installation, TenantInstallation, PROVIDER_GOOGLE, PROVIDER_SLACK,
};
use chrono::{Duration, Utc};

const SLACK_INSTALL_OWNER: &str = "install";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthFlow {
    GoogleAds,
    SearchConsole,
    SlackInstall,
}

impl OAuthFlow {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthFlow::GoogleAds => "google",
            OAuthFlow::SearchConsole => "gsc",
            OAuthFlow::SlackInstall => "slack",
        }
    }
}

/// `{owner}:{token}`, where owner is the tenant id or the install marker.
pub fn state_value(owner: &str, token: &str) -> String {
    format!("{}:{}", owner, token)
}

fn flow_state_key(flow: OAuthFlow, state_param: &str) -> String {
    oauth_state_key(&format!("{}:{}", flow.as_str(), state_param))
}

pub fn google_authorize_link(state: &AppState, tenant_id: i32) -> String {
    format!(
        "{}/oauth/google/authorize?tenant_id={}",
        state.config.app_base_url, tenant_id
    )
}

async fn store_state(state: &AppState, flow: OAuthFlow, owner: String) -> AppResult<String> {
    let state_param = state_value(&owner, &generate_state_token());
    let key = flow_state_key(flow, &state_param);

    run_blocking(&state.pool, move |pool| {
        ephemeral::put(pool, &key, &owner, Duration::seconds(OAUTH_STATE_TTL_SECS))
    })
    .await?;

    Ok(state_param)
}

/// Consumes a state value and returns its owner. Unknown, reused and expired values fail alike.
pub async fn consume_state(
    state: &AppState,
    flow: OAuthFlow,
    state_param: &str,
) -> AppResult<String> {
    let key = flow_state_key(flow, state_param);
    run_blocking(&state.pool, move |pool| ephemeral::take(pool, &key))
        .await?
        .ok_or(AppError::InvalidToken)
}

fn owner_tenant_id(owner: &str) -> AppResult<i32> {
    owner.parse().map_err(|_| AppError::InvalidToken)
}

/// Consent URL for a Google flow, bound to a fresh state value.
pub async fn begin_google(state: &AppState, flow: OAuthFlow, tenant_id: i32) -> AppResult<String> {
    let (scope, redirect_uri) = match flow {
        OAuthFlow::SearchConsole => (WEBMASTERS_SCOPE, state.config.gsc_redirect_uri()),
        _ => (ADWORDS_SCOPE, state.config.google_redirect_uri()),
    };

    let state_param = store_state(state, flow, tenant_id.to_string()).await?;
    tracing::info!("Starting {} OAuth for tenant {}", flow.as_str(), tenant_id);

    state
        .google_oauth
        .authorize_url(scope, &redirect_uri, &state_param)
        .map_err(|e| AppError::from_client(flow.as_str(), e))
}

/// The optional tenant only labels the state; the installing workspace decides the tenant.
pub async fn begin_slack_install(state: &AppState, tenant_id: Option<i32>) -> AppResult<String> {
    let client_id = state
        .config
        .slack_client_id
        .clone()
        .ok_or_else(|| AppError::slack(ClientError::NotConfigured("SLACK_CLIENT_ID")))?;

    let owner = tenant_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| SLACK_INSTALL_OWNER.to_string());
    let state_param = store_state(state, OAuthFlow::SlackInstall, owner).await?;
    Ok(slack::authorize_url(
        &client_id,
        &state.config.slack_redirect_uri(),
        &state_param,
    ))
}

/// Exchanges the code, stores sealed tokens and records the tenant's Ads accounts.
/// Account discovery failures are logged and leave the tokens in place.
pub async fn complete_google(
    state: &AppState,
    state_param: &str,
    code: &str,
) -> AppResult<Vec<GoogleAdsAccount>> {
    let tenant_id = owner_tenant_id(&consume_state(state, OAuthFlow::GoogleAds, state_param).await?)?;

    let tokens = state
        .google_oauth
        .exchange_code(code, &state.config.google_redirect_uri())
        .await
        .map_err(|e| AppError::from_client(PROVIDER_GOOGLE, e))?;

    if tokens.refresh_token.is_none() {
        tracing::warn!("No refresh token received for tenant {}", tenant_id);
    }

    let sealed_access = state.cipher.seal(&tokens.access_token).map_err(AppError::internal)?;
    let sealed_refresh = state
        .cipher
        .seal_optional(tokens.refresh_token.as_deref())
        .map_err(AppError::internal)?;
    let expires_at = tokens.expires_at(Utc::now());

    run_blocking(&state.pool, move |pool| {
        upsert_oauth_token(
            pool,
            NewOAuthToken {
                tenant_id,
                provider: PROVIDER_GOOGLE,
                access_token: &sealed_access,
                refresh_token: sealed_refresh.as_deref(),
                expires_at: Some(expires_at),
                scope: Some(ADWORDS_SCOPE),
            },
        )
    })
    .await?;
    state
        .google_oauth
        .remember(&google_cache_key(tenant_id), &tokens.access_token, expires_at);
    tracing::info!("Stored Google OAuth tokens for tenant {}", tenant_id);

    let discovered = match state
        .google_ads
        .list_accessible_accounts(&tokens.access_token)
        .await
    {
        Ok(accounts) => accounts,
        Err(e) => {
            tracing::error!("Failed to list Google Ads accounts for tenant {}: {}", tenant_id, e);
            return Ok(Vec::new());
        }
    };

    if discovered.is_empty() {
        tracing::warn!("No accessible Google Ads accounts for tenant {}", tenant_id);
        return Ok(Vec::new());
    }

    let stored = run_blocking(&state.pool, move |pool| {
        let rows: Vec<NewGoogleAdsAccount> = discovered
            .iter()
            .enumerate()
            .map(|(index, a)| NewGoogleAdsAccount {
                tenant_id,
                customer_id: &a.customer_id,
                account_name: Some(&a.account_name),
                currency: &a.currency,
                timezone: &a.timezone,
                is_active: index == 0,
            })
            .collect();
        replace_ads_accounts(pool, tenant_id, &rows)
    })
    .await?;

    tracing::info!(
        "Recorded {} Google Ads accounts for tenant {}",
        stored.len(),
        tenant_id
    );
    Ok(stored)
}

/// Stores the verified Search Console sites; the first site becomes the active one.
pub async fn complete_search_console(
    state: &AppState,
    state_param: &str,
    code: &str,
) -> AppResult<Vec<SearchConsoleAccount>> {
    let tenant_id =
        owner_tenant_id(&consume_state(state, OAuthFlow::SearchConsole, state_param).await?)?;

    let tokens = state
        .google_oauth
        .exchange_code(code, &state.config.gsc_redirect_uri())
        .await
        .map_err(|e| AppError::from_client("gsc", e))?;

    let refresh_token = tokens
        .refresh_token
        .as_deref()
        .ok_or_else(|| AppError::oauth("gsc"))?;
    let sealed_refresh = state.cipher.seal(refresh_token).map_err(AppError::internal)?;

    let sites = state
        .search_console
        .list_sites(&tokens.access_token)
        .await
        .map_err(|e| AppError::from_client("gsc", e))?;

    if sites.is_empty() {
        return Err(AppError::Validation("no verified Search Console sites".into()));
    }

    let stored = run_blocking(&state.pool, move |pool| {
        let mut stored = Vec::with_capacity(sites.len());
        for (index, site) in sites.iter().enumerate() {
            stored.push(upsert_search_console_account(
                pool,
                NewSearchConsoleAccount {
                    tenant_id,
                    site_url: site,
                    refresh_token: Some(&sealed_refresh),
                    is_active: index == 0,
                },
            )?);
        }
        Ok(stored)
    })
    .await?;

    for account in &stored {
        state.google_oauth.invalidate(&gsc_cache_key(account.id));
    }
    tracing::info!(
        "Connected {} Search Console sites for tenant {}",
        stored.len(),
        tenant_id
    );
    Ok(stored)
}

/// Finishes the Slack install: the workspace becomes (or stays) a tenant with a sealed bot token.
pub async fn complete_slack_install(
    state: &AppState,
    state_param: &str,
    code: &str,
) -> AppResult<Tenant> {
    consume_state(state, OAuthFlow::SlackInstall, state_param).await?;

    let (client_id, client_secret) = match (
        state.config.slack_client_id.clone(),
        state.config.slack_client_secret.clone(),
    ) {
        (Some(id), Some(secret)) => (id, secret),
        _ => {
            return Err(AppError::slack(ClientError::NotConfigured(
                "SLACK_CLIENT_ID/SLACK_CLIENT_SECRET",
            )))
        }
    };

    let access = state
        .slack
        .oauth_access(&client_id, &client_secret, code, &state.config.slack_redirect_uri())
        .await
        .map_err(|e| AppError::from_client(PROVIDER_SLACK, e))?;

    let team = access
        .team
        .ok_or_else(|| AppError::slack("oauth.v2.access returned no team"))?;
    let bot_token = access
        .access_token
        .ok_or_else(|| AppError::slack("oauth.v2.access returned no bot token"))?;
    let channel = access.incoming_webhook.and_then(|w| w.channel_id);

    let sealed = state.cipher.seal(&bot_token).map_err(AppError::internal)?;

    let tenant = run_blocking(&state.pool, move |pool| {
        upsert_tenant_installation(
            pool,
            TenantInstallation {
                workspace_id: &team.id,
                workspace_name: team.name.as_deref(),
                sealed_bot_token: &sealed,
                slack_channel_id: channel.as_deref(),
            },
        )
    })
    .await?;

    tracing::info!(
        "Installed Slack app for workspace {} (tenant {})",
        tenant.workspace_id,
        tenant.id
    );
    Ok(tenant)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_value_carries_owner() {
        let value = state_value("42", "abc");
        assert_eq!(value, "42:abc");
        assert_eq!(owner_tenant_id("42").unwrap(), 42);
    }

    #[test]
    fn test_install_owner_is_not_a_tenant() {
        assert!(matches!(
            owner_tenant_id(SLACK_INSTALL_OWNER),
            Err(AppError::InvalidToken)
        ));
    }

    #[test]
    fn test_flow_state_keys_are_separate() {
        let google = flow_state_key(OAuthFlow::GoogleAds, "1:tok");
        let gsc = flow_state_key(OAuthFlow::SearchConsole, "1:tok");
        assert_eq!(google, "oauth_state:google:1:tok");
        assert_ne!(google, gsc);
    }
}
